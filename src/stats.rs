use crate::icmp::FailureReason;

#[derive(Debug, Clone)]
pub struct PingStatistics {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    pub timed_out: u32,
    pub unreachable: u32,
    pub time_exceeded: u32,
    pub too_big: u32,
    pub min_time: f64,
    pub max_time: f64,
    pub total_time: f64,
}

impl PingStatistics {
    pub fn new() -> Self {
        Self {
            packets_sent: 0,
            packets_received: 0,
            packets_lost: 0,
            timed_out: 0,
            unreachable: 0,
            time_exceeded: 0,
            too_big: 0,
            min_time: f64::INFINITY,
            max_time: 0.0,
            total_time: 0.0,
        }
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_received(&mut self, time_ms: f64) {
        self.packets_received += 1;
        self.total_time += time_ms;

        if time_ms < self.min_time {
            self.min_time = time_ms;
        }

        if time_ms > self.max_time {
            self.max_time = time_ms;
        }
    }

    pub fn record_lost(&mut self, reason: FailureReason) {
        self.packets_lost += 1;
        match reason {
            FailureReason::TimedOut => self.timed_out += 1,
            FailureReason::DestinationUnreachable => self.unreachable += 1,
            FailureReason::TimeExceeded => self.time_exceeded += 1,
            FailureReason::PacketTooBig => self.too_big += 1,
        }
    }

    pub fn loss_percentage(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        (self.packets_lost as f64 / self.packets_sent as f64) * 100.0
    }

    pub fn average_time(&self) -> f64 {
        if self.packets_received == 0 {
            return 0.0;
        }
        self.total_time / self.packets_received as f64
    }

    pub fn format_summary(&self, target: &str) -> String {
        let mut summary = format!(
            "\nPing statistics for {}:\n    Packets: Probes = {}, Received = {}, Lost = {} ({:.0}% loss),\n",
            target,
            self.packets_sent,
            self.packets_received,
            self.packets_lost,
            self.loss_percentage()
        );

        if self.packets_lost > 0 {
            summary.push_str(&format!(
                "    Lost: timed out = {}, unreachable = {}, time exceeded = {}, too big = {}\n",
                self.timed_out, self.unreachable, self.time_exceeded, self.too_big
            ));
        }

        if self.packets_received > 0 {
            let min_time = if self.min_time == f64::INFINITY { 0.0 } else { self.min_time };
            summary.push_str(&format!(
                "Approximate round trip times in milli-seconds:\n    Minimum = {:.0}ms, Maximum = {:.0}ms, Average = {:.0}ms\n",
                min_time,
                self.max_time,
                self.average_time()
            ));
        }

        summary
    }
}

impl Default for PingStatistics {
    fn default() -> Self {
        Self::new()
    }
}
