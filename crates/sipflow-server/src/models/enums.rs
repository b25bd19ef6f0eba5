//! Status and type enumerations shared by the domain records
//!
//! Every enum is stored and serialized as its wire string; parsing ignores
//! ASCII case.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Ok($name::$variant);
                    }
                )+
                Err(ParseEnumError { kind: $kind, value: s.to_string() })
            }
        }
    };
}

wire_enum! {
    /// Lifecycle of a SIP. `Ingested`, `Failed` and `Error` are terminal.
    SipStatus ("SIP status") {
        Error => "error",
        Failed => "failed",
        Queued => "queued",
        Processing => "processing",
        Pending => "pending",
        Ingested => "ingested",
    }
}

impl SipStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SipStatus::Ingested | SipStatus::Failed | SipStatus::Error)
    }
}

impl Default for SipStatus {
    fn default() -> Self {
        SipStatus::Queued
    }
}

wire_enum! {
    /// Package kind preserved in the internal bucket when processing fails.
    FailedAs ("failed as") {
        Sip => "SIP",
        Pip => "PIP",
    }
}

wire_enum! {
    WorkflowType ("workflow type") {
        CreateAip => "create-aip",
        CreateAndReviewAip => "create-and-review-aip",
        MoveAip => "move-aip",
    }
}

impl Default for WorkflowType {
    fn default() -> Self {
        WorkflowType::CreateAip
    }
}

wire_enum! {
    WorkflowStatus ("workflow status") {
        Unspecified => "unspecified",
        InProgress => "in-progress",
        Done => "done",
        Error => "error",
        Queued => "queued",
        Pending => "pending",
        Failed => "failed",
        Canceled => "canceled",
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        WorkflowStatus::Unspecified
    }
}

wire_enum! {
    TaskStatus ("task status") {
        Unspecified => "unspecified",
        InProgress => "in-progress",
        Done => "done",
        Error => "error",
        Queued => "queued",
        Pending => "pending",
        Failed => "failed",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Unspecified
    }
}

wire_enum! {
    /// Batch lifecycle, mirroring [`SipStatus`].
    BatchStatus ("batch status") {
        Error => "error",
        Failed => "failed",
        Queued => "queued",
        Processing => "processing",
        Pending => "pending",
        Ingested => "ingested",
        Canceled => "canceled",
    }
}

impl Default for BatchStatus {
    fn default() -> Self {
        BatchStatus::Queued
    }
}
