use log::debug;
use std::time::Instant;
use systemstat::{Platform, System};

use crate::delta::CounterPair;
use crate::error::ReadingError;

/// Cumulative bytes (sent, received) over the selected interfaces. Loopback is
/// ignored unless it is listed explicitly.
pub fn collect_counters(sys: &System, allowed: &[String]) -> Result<CounterPair, ReadingError> {
    let start = Instant::now();
    let networks = sys.networks()?;
    let mut rx_bytes = 0u64;
    let mut tx_bytes = 0u64;
    let mut matched = 0usize;

    for net in networks.values() {
        if !is_selected(&net.name, allowed) {
            continue;
        }
        if let Ok(stats) = sys.network_stats(&net.name) {
            matched += 1;
            rx_bytes = rx_bytes.saturating_add(stats.rx_bytes.as_u64());
            tx_bytes = tx_bytes.saturating_add(stats.tx_bytes.as_u64());
        }
    }
    debug!("collect_counters took: {} ms", start.elapsed().as_millis());

    if matched == 0 {
        return Err(ReadingError::unavailable("no matching network interfaces"));
    }
    Ok(CounterPair(tx_bytes, rx_bytes))
}

fn is_selected(name: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        name != "lo"
    } else {
        allowed.iter().any(|a| a == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_only_when_listed() {
        assert!(!is_selected("lo", &[]));
        assert!(is_selected("eth0", &[]));
        assert!(is_selected("lo", &["lo".to_string()]));
        assert!(!is_selected("eth0", &["wlan0".to_string()]));
    }
}
