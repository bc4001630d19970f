use fleet_common::FleetSnapshot;

use crate::config::Config;

/// Per-zone inputs to placement: counts come from the live view, uptime and
/// termination history from the cached view.
#[derive(Debug, Clone)]
pub struct ZoneStats {
    pub zone: String,
    pub instance_count: usize,
    pub termination_rate: f64,
    pub total_uptime_hour: f64,
}

/// Ranks configured zones for recovery placement.
pub struct ZoneRanker {
    stats: Vec<ZoneStats>,
    termination_rate_threshold: f64,
    min_zone_spread: usize,
    unstable_zone_threshold: f64,
}

impl ZoneRanker {
    pub fn new(config: &Config, cache: &FleetSnapshot, live: &FleetSnapshot) -> Self {
        let stats = config
            .zones
            .iter()
            .map(|name| {
                let (rate, uptime) = cache
                    .zone(name)
                    .map(|z| (z.termination_rate(), z.total_uptime_hour()))
                    .unwrap_or((0.0, 0.0));
                ZoneStats {
                    zone: name.clone(),
                    instance_count: live.instance_count_in(name),
                    termination_rate: rate,
                    total_uptime_hour: uptime,
                }
            })
            .collect();
        Self::from_stats(
            stats,
            config.termination_rate_threshold(),
            config.min_zone_spread,
            config.unstable_zone_threshold(),
        )
    }

    pub fn from_stats(
        stats: Vec<ZoneStats>,
        termination_rate_threshold: f64,
        min_zone_spread: usize,
        unstable_zone_threshold: f64,
    ) -> Self {
        Self {
            stats,
            termination_rate_threshold,
            min_zone_spread,
            unstable_zone_threshold,
        }
    }

    fn stat(&self, zone: &str) -> Option<&ZoneStats> {
        self.stats.iter().find(|s| s.zone == zone)
    }

    /// A zone is in low preemptible supply once its termination rate exceeds
    /// the configured threshold.
    pub fn zone_low_supply(&self, zone: &str) -> bool {
        self.stat(zone)
            .map(|s| s.termination_rate > self.termination_rate_threshold)
            .unwrap_or(false)
    }

    /// Overall preemptible supply is low when the stable zones cannot carry
    /// the required spread, or too many zones are unstable.
    pub fn global_low_supply(&self) -> bool {
        let stable: Vec<&ZoneStats> = self
            .rank_by_termination_rate()
            .into_iter()
            .filter(|s| s.termination_rate <= self.termination_rate_threshold)
            .collect();
        if stable.is_empty() || stable.len() < self.min_zone_spread {
            return true;
        }
        let unstable_count = self.stats.len() - stable.len();
        unstable_count as f64 > self.unstable_zone_threshold
    }

    /// Zones ordered by ascending instance count.
    pub fn rank_by_instance_count(&self, include_low_supply: bool) -> Vec<&ZoneStats> {
        let mut ranked: Vec<&ZoneStats> = self
            .stats
            .iter()
            .filter(|s| include_low_supply || s.termination_rate <= self.termination_rate_threshold)
            .collect();
        ranked.sort_by_key(|s| s.instance_count);
        ranked
    }

    /// Zones ordered by ascending termination rate.
    pub fn rank_by_termination_rate(&self) -> Vec<&ZoneStats> {
        let mut ranked: Vec<&ZoneStats> = self.stats.iter().collect();
        ranked.sort_by(|a, b| {
            a.termination_rate
                .partial_cmp(&b.termination_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Pick the zone a relocated preemptible instance should land in.
    ///
    /// Walks zones by ascending instance count, collecting candidates until
    /// the distinct count values seen reach the spread requirement, then
    /// picks the candidate with the lowest termination rate, breaking ties
    /// on the lower instance count. Zones in low supply never qualify, so
    /// the result can be `None`.
    pub fn select_zone_candidate(&self) -> Option<&ZoneStats> {
        let mut candidates: Vec<&ZoneStats> = Vec::new();
        let mut distinct_counts: Vec<usize> = Vec::new();
        for stat in self.rank_by_instance_count(false) {
            if distinct_counts.len() < self.min_zone_spread {
                candidates.push(stat);
                if !distinct_counts.contains(&stat.instance_count) {
                    distinct_counts.push(stat.instance_count);
                }
            }
        }
        let mut best: Option<&ZoneStats> = None;
        for stat in candidates {
            match best {
                None => best = Some(stat),
                Some(current) => {
                    let lower_rate = stat.termination_rate < current.termination_rate;
                    let tie_on_rate = stat.termination_rate == current.termination_rate
                        && stat.instance_count < current.instance_count;
                    if lower_rate || tie_on_rate {
                        best = Some(stat);
                    }
                }
            }
        }
        best
    }
}
