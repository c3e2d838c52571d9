//! Byzantine behavior injector.
//!
//! A behavior is a strategy value attached to a node's [`Role`] and invoked
//! only at the node's outbound boundary. Engines never see it, so adding a
//! new adversarial behavior never touches protocol code.

use crate::message::{Message, Multicast, SendClass};
use crate::vector_clock::VectorClock;
use rbcast_env::NodeId;
use serde::{Deserialize, Serialize};

/// Amount added to every vector clock entry by `VectorClockInflation`.
pub const INFLATION_STEP: u64 = 10;

/// Outbound transformation applied by a Byzantine node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByzantineBehavior {
    /// No transformation
    #[default]
    PassThrough,

    /// Drops every relay; the node's own broadcasts still go out
    NoRelay,

    /// Caps each fan-out at the first `k` targets by id
    LimitedBroadcast(usize),

    /// Inflates the vector clock on the node's own RCO broadcasts
    VectorClockInflation,

    /// Zeroes the vector clock on the node's own RCO broadcasts
    VectorClockDeflation,

    /// Own RCO broadcasts claim no causal dependencies, as if the node
    /// dropped every RCO message it received
    RcoDropMessages,

    /// After delivering a Dolev broadcast, also sends a conflicting payload
    /// that claims to come straight from the broadcaster
    ForgeSender,

    /// Every ECHO is accompanied by an ECHO and a READY for a forged
    /// payload shared by all colluders
    Collude,
}

impl ByzantineBehavior {
    /// Parses a CLI behavior name; `limited_neighbors` feeds `limited_broadcast`.
    pub fn parse(name: &str, limited_neighbors: usize) -> Result<Self, String> {
        match name.to_lowercase().as_str() {
            "none" | "pass_through" | "passthrough" => Ok(Self::PassThrough),
            "no_relay" | "norelay" => Ok(Self::NoRelay),
            "limited_broadcast" | "limited" => Ok(Self::LimitedBroadcast(limited_neighbors)),
            "vc_inflation" | "vector_clock_inflation" => Ok(Self::VectorClockInflation),
            "vc_deflation" | "vector_clock_deflation" => Ok(Self::VectorClockDeflation),
            "rco_drop_messages" | "rco_drop" => Ok(Self::RcoDropMessages),
            "forge_sender" | "forge" => Ok(Self::ForgeSender),
            "collude" => Ok(Self::Collude),
            _ => Err(format!("Unknown byzantine behavior: {}", name)),
        }
    }

    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PassThrough => "none",
            Self::NoRelay => "no_relay",
            Self::LimitedBroadcast(_) => "limited_broadcast",
            Self::VectorClockInflation => "vc_inflation",
            Self::VectorClockDeflation => "vc_deflation",
            Self::RcoDropMessages => "rco_drop_messages",
            Self::ForgeSender => "forge_sender",
            Self::Collude => "collude",
        }
    }

    /// Transforms one fan-out of node `local`. `None` means the send is
    /// suppressed entirely.
    pub fn apply(&self, local: NodeId, mut send: Multicast<Message>) -> Option<Multicast<Message>> {
        match self {
            Self::PassThrough => Some(send),
            Self::NoRelay => match send.class {
                SendClass::Origin => Some(send),
                SendClass::Relay => None,
            },
            Self::LimitedBroadcast(k) => {
                send.targets.sort();
                send.targets.truncate(*k);
                if send.targets.is_empty() {
                    None
                } else {
                    Some(send)
                }
            }
            Self::VectorClockInflation => {
                send.message
                    .rewrite_own_clock(local, |clock| clock.inflate(INFLATION_STEP));
                Some(send)
            }
            Self::VectorClockDeflation => {
                send.message.rewrite_own_clock(local, VectorClock::deflate);
                Some(send)
            }
            Self::RcoDropMessages => {
                send.message
                    .rewrite_own_clock(local, |clock| clock.retain_only(local));
                Some(send)
            }
            Self::ForgeSender | Self::Collude => Some(send),
        }
    }

    /// Extra fan-outs node `local` emits next to `send`.
    pub fn forgeries(&self, local: NodeId, send: &Multicast<Message>) -> Vec<Multicast<Message>> {
        let forged = match self {
            Self::ForgeSender => send.message.forge_origin(local).into_iter().collect(),
            Self::Collude => send.message.forge_votes(local),
            _ => Vec::new(),
        };

        forged
            .into_iter()
            .filter_map(|message| {
                // A path must never lead back to a node it names
                let targets: Vec<NodeId> = send
                    .targets
                    .iter()
                    .copied()
                    .filter(|target| !message.path().contains(target))
                    .collect();
                (!targets.is_empty()).then_some(Multicast {
                    targets,
                    message,
                    class: send.class,
                })
            })
            .collect()
    }
}

impl std::fmt::Display for ByzantineBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitedBroadcast(k) => write!(f, "limited_broadcast({})", k),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Per-node tag fixed at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Correct,
    Byzantine(ByzantineBehavior),
}

impl Role {
    pub fn is_correct(&self) -> bool {
        matches!(self, Role::Correct)
    }

    /// Injector in effect for this role. Correct nodes always pass through.
    pub fn behavior(&self) -> ByzantineBehavior {
        match self {
            Role::Correct => ByzantineBehavior::PassThrough,
            Role::Byzantine(behavior) => *behavior,
        }
    }
}
