//! Live ingest event stream
//!
//! A monitor redeems a ticket, subscribes to the event bus and forwards every
//! event the ticket's claims may see, with a keepalive ping every
//! [`PING_INTERVAL`].

use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::auth::{self, Claims};
use crate::event::IngestEvent;
use crate::ingest::{IngestError, IngestService, Result, TicketResponse};

pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Whether `claims` may receive `event`.
///
/// Pings on the bus are not forwarded; monitors emit their own.
pub fn permitted(claims: Option<&Claims>, event: &IngestEvent) -> bool {
    match event {
        IngestEvent::Ping(_) => false,
        IngestEvent::SipCreated(_) => auth::check_attributes(claims, &[auth::SIPS_LIST]),
        IngestEvent::SipUpdated(_) | IngestEvent::SipStatusUpdated(_) => {
            auth::check_attributes(claims, &[auth::SIPS_LIST])
                || auth::check_attributes(claims, &[auth::SIPS_READ])
        },
        IngestEvent::SipWorkflowCreated(_)
        | IngestEvent::SipWorkflowUpdated(_)
        | IngestEvent::SipTaskCreated(_)
        | IngestEvent::SipTaskUpdated(_) => {
            auth::check_attributes(claims, &[auth::SIPS_WORKFLOWS_LIST])
        },
    }
}

impl IngestService {
    #[tracing::instrument(skip(self, claims))]
    pub async fn monitor_request(&self, claims: Option<&Claims>) -> Result<TicketResponse> {
        let ticket = self.tickets.request(claims).await.map_err(|e| {
            error!(error = %e, "Cannot request monitor ticket");
            IngestError::not_available()
        })?;
        Ok(TicketResponse { ticket })
    }

    /// Stream events into `stream` until `cancel` fires, the subscription
    /// closes or a send fails.
    #[tracing::instrument(skip(self, ticket, cancel, stream))]
    pub async fn monitor<S>(&self, ticket: &str, cancel: CancellationToken, mut stream: S) -> Result<()>
    where
        S: Sink<IngestEvent> + Unpin,
        S::Error: Display,
    {
        let claims = self.tickets.check(ticket).await.map_err(|e| {
            debug!(error = %e, "Monitor ticket rejected");
            IngestError::not_available()
        })?;

        let mut subscription = self.events.subscribe(cancel.child_token()).map_err(|e| {
            error!(error = %e, "Cannot subscribe to events");
            IngestError::internal("cannot subscribe to events")
        })?;

        if let Err(e) = stream.send(IngestEvent::ping("Hello")).await {
            debug!(error = %e, "Monitor stream closed");
            return Ok(());
        }

        let mut ticker = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => IngestEvent::ping("Ping"),
                event = subscription.recv() => match event {
                    Some(event) if permitted(claims.as_ref(), &event) => event,
                    Some(_) => continue,
                    None => break,
                },
            };
            if let Err(e) = stream.send(event).await {
                debug!(error = %e, "Monitor stream closed");
                break;
            }
        }

        subscription.close();
        Ok(())
    }
}
