// Delivery, Latency and Propagation
//
// Derived from the message table once ingestion is complete. Latencies are
// written back into each MessageRecord; propagation times and delivery
// figures are returned as new structures.

use indexmap::IndexMap;
use log::{info, warn};
use serde::Serialize;

use crate::ra_config::{DeliveryDenominator, NegativeLatencyPolicy};
use crate::ra_error::AnalysisError;
use crate::ra_inputs::InjectedLedger;
use crate::ra_interface::{MessageHash, MessageRecord, NANOS_PER_MILLI};

/// Anomalies met while computing latencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyDiagnostics {
    pub multiple_publishers: usize,
    pub missing_publisher: usize,
    pub self_receipts: usize,
    pub negative_latencies: usize,
    pub unpropagated_messages: usize,
}

// ============================================================================
// Latencies
// ============================================================================

/// Fill `latencies` of every message
///
/// Latency is receive time minus the first publish time, in nanoseconds.
/// Receipts logged by the publisher itself are not latencies. A message with
/// no publish at all is skipped and keeps an empty latency list.
pub fn compute_latencies(
    messages: &mut IndexMap<MessageHash, MessageRecord>,
    policy: NegativeLatencyPolicy,
) -> LatencyDiagnostics {
    let mut diagnostics = LatencyDiagnostics::default();

    for (hash, message) in messages.iter_mut() {
        message.latencies.clear();

        if message.has_multiple_publishers() {
            warn!(
                "Several publishers of message {}: {}, using the first",
                hash,
                message.published.len()
            );
            diagnostics.multiple_publishers += 1;
        }

        let Some(publish) = message.canonical_publish() else {
            warn!("Message {} was received but never published, skipping", hash);
            diagnostics.missing_publisher += 1;
            continue;
        };
        let (published_ts, publisher) = (publish.ts, publish.peer_key.clone());

        let mut latencies = Vec::with_capacity(message.received.len());
        for receipt in &message.received {
            if receipt.peer_key == publisher {
                warn!("Message {} received by the same node that published it", hash);
                diagnostics.self_receipts += 1;
                continue;
            }

            // negative values come from nodes that got the message injected directly
            let latency = receipt.ts - published_ts;
            if latency < 0 {
                diagnostics.negative_latencies += 1;
                match policy {
                    NegativeLatencyPolicy::Discard => continue,
                    NegativeLatencyPolicy::Clamp => {
                        latencies.push(0);
                        continue;
                    }
                    NegativeLatencyPolicy::Retain => {}
                }
            }
            latencies.push(latency);
        }

        message.latencies = latencies;
    }

    if diagnostics.negative_latencies > 0 {
        info!(
            "{} negative latencies handled with policy {:?}",
            diagnostics.negative_latencies, policy
        );
    }
    diagnostics
}

// ============================================================================
// Propagation
// ============================================================================

/// Propagation time per message, in milliseconds
///
/// `None` marks a message that never reached another node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropagationTimes {
    pub per_message: IndexMap<MessageHash, Option<f64>>,
}

impl PropagationTimes {
    /// Times of messages that did propagate, in message order
    pub fn values(&self) -> Vec<f64> {
        self.per_message.values().flatten().copied().collect()
    }

    pub fn unpropagated(&self) -> usize {
        self.per_message.values().filter(|t| t.is_none()).count()
    }
}

/// Slowest receipt of each message, ns converted to ms
pub fn compute_propagation_times(
    messages: &IndexMap<MessageHash, MessageRecord>,
) -> PropagationTimes {
    let per_message = messages
        .iter()
        .map(|(hash, message)| {
            let slowest = message.latencies.iter().max().map(|&ns| ns as f64 / NANOS_PER_MILLI);
            (hash.clone(), slowest)
        })
        .collect();

    PropagationTimes { per_message }
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub total: usize,
    /// Negative when more hashes were observed than injected
    pub lost: i64,
    /// Percentage; `None` when nothing was injected
    pub rate: Option<f64>,
}

fn counted(ledger: &InjectedLedger, denominator: DeliveryDenominator) -> usize {
    match denominator {
        DeliveryDenominator::All => ledger.len(),
        DeliveryDenominator::Successful => ledger.values().filter(|m| m.succeeded()).count(),
    }
}

pub fn compute_delivery_rate(
    messages: &IndexMap<MessageHash, MessageRecord>,
    ledger: &InjectedLedger,
    denominator: DeliveryDenominator,
) -> DeliveryStats {
    let delivered = messages.len();
    let total = counted(ledger, denominator);
    let lost = total as i64 - delivered as i64;

    let rate = if total == 0 {
        warn!("{}", AnalysisError::EmptyDenominator);
        None
    } else {
        Some(delivered as f64 * 100.0 / total as f64)
    };

    info!(
        "{} of {} messages delivered. Lost: {}. Delivery rate {}",
        delivered,
        total,
        lost,
        rate.map_or_else(|| "undefined".to_string(), |r| format!("{:.2}%", r))
    );

    DeliveryStats {
        delivered,
        total,
        lost,
        rate,
    }
}

/// Injection times of the ledger entries that count as injected
pub fn compute_injection_times(ledger: &InjectedLedger, denominator: DeliveryDenominator) -> Vec<f64> {
    ledger
        .values()
        .filter(|m| denominator == DeliveryDenominator::All || m.succeeded())
        .map(|m| m.injection_time)
        .collect()
}

// ============================================================================
// Distributions
// ============================================================================

/// Summary statistics over a set of values
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
}

impl Distribution {
    /// `None` for an empty input
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        // nearest rank
        let p95_index = ((count as f64 * 0.95).ceil() as usize).clamp(1, count) - 1;

        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean: sorted.iter().sum::<f64>() / count as f64,
            median,
            p95: sorted[p95_index],
        })
    }
}

/// Every latency of every message, in milliseconds
pub fn latencies_ms(messages: &IndexMap<MessageHash, MessageRecord>) -> Vec<f64> {
    messages
        .values()
        .flat_map(|m| m.latencies.iter())
        .map(|&ns| ns as f64 / NANOS_PER_MILLI)
        .collect()
}
