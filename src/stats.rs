//! Transfer statistics.
//!
//! [`TransferStats`] accumulates the sender-side counters during a flow and
//! renders the final report block.  The numbers are observable output only;
//! nothing in the protocol machinery depends on them.

use std::fmt;
use std::time::Duration;

/// Counters for one completed (or aborted) flow.
#[derive(Debug, Default)]
pub struct TransferStats {
    /// Bytes confirmed delivered (cumulative or selective ack).
    pub bytes_delivered: u64,
    /// DATA packets handed to the socket, retransmissions included.
    pub packets_sent: u64,
    /// DATA retransmissions (timeout or fast retransmit).
    pub retransmissions: u64,
    /// Sum of RTT samples in microseconds.
    pub rtt_sum_us: u64,
    /// Number of RTT samples.
    pub rtt_samples: u64,
    /// Wall-clock from the first-ever send to the last ack.
    pub elapsed: Duration,
    /// Receive window advertised by the peer, in packets.
    pub recv_window: u16,
}

impl TransferStats {
    /// Record one RTT sample; non-positive samples are discarded.
    pub fn record_rtt(&mut self, rtt: Duration) {
        let us = rtt.as_micros() as u64;
        if us > 0 {
            self.rtt_sum_us += us;
            self.rtt_samples += 1;
        }
    }

    /// Retransmissions as a fraction of all DATA sends.
    pub fn loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.packets_sent as f64
    }

    /// Mean RTT in microseconds, 0 when no sample was taken.
    pub fn avg_rtt_us(&self) -> f64 {
        if self.rtt_samples == 0 {
            return 0.0;
        }
        self.rtt_sum_us as f64 / self.rtt_samples as f64
    }

    /// Delivered throughput in MB/s over the measured interval.
    pub fn throughput_mb_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(1e-6);
        self.bytes_delivered as f64 / secs / (1024.0 * 1024.0)
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mb_s = self.throughput_mb_s();
        writeln!(f, "===== RUDP Statistics (Sender) =====")?;
        writeln!(f, "Bytes delivered:        {} bytes", self.bytes_delivered)?;
        writeln!(
            f,
            "Data packets sent:      {} (retransmissions={})",
            self.packets_sent, self.retransmissions
        )?;
        writeln!(f, "Approx. loss rate:      {:.2} %", self.loss_rate() * 100.0)?;
        writeln!(f, "Average RTT:            {:.0} us", self.avg_rtt_us())?;
        writeln!(
            f,
            "Throughput:             {:.3} MB/s ({:.3} Mbps)",
            mb_s,
            mb_s * 8.0
        )?;
        write!(f, "Configured recv window: {} packets", self.recv_window)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_rates_handle_empty_flow() {
        let stats = TransferStats::default();
        assert_eq!(stats.loss_rate(), 0.0);
        assert_eq!(stats.avg_rtt_us(), 0.0);
        assert_eq!(stats.throughput_mb_s(), 0.0);
    }

    #[test]
    fn rtt_samples_average() {
        let mut stats = TransferStats::default();
        stats.record_rtt(Duration::from_micros(100));
        stats.record_rtt(Duration::from_micros(300));
        stats.record_rtt(Duration::ZERO); // discarded
        assert_eq!(stats.rtt_samples, 2);
        assert_eq!(stats.avg_rtt_us(), 200.0);
    }

    #[test]
    fn loss_rate_is_retransmit_share() {
        let stats = TransferStats {
            packets_sent: 10,
            retransmissions: 3,
            ..TransferStats::default()
        };
        assert_eq!(stats.loss_rate(), 0.3);
    }

    #[test]
    fn report_lists_all_fields() {
        let stats = TransferStats {
            bytes_delivered: 4096,
            packets_sent: 5,
            retransmissions: 0,
            elapsed: Duration::from_millis(10),
            recv_window: 64,
            ..TransferStats::default()
        };
        let report = stats.to_string();
        assert!(report.contains("4096 bytes"));
        assert!(report.contains("5 (retransmissions=0)"));
        assert!(report.contains("64 packets"));
    }
}
