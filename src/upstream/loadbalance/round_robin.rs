use super::UpstreamInstance;
use std::sync::Mutex;

/// Smooth Weighted Round Robin: each server carries a fixed `weight` (from
/// config) and a mutable `effective_weight` that decays on failure and
/// recovers toward `weight` on success, plus a `current_weight` accumulator
/// used purely for selection spacing.
struct WeightEntry {
    instance: UpstreamInstance,
    weight: i64,
    effective_weight: i64,
    current_weight: i64,
}

/// Weighted Round-Robin balancer using the nginx-style smooth algorithm:
/// on each pick, add `effective_weight` to `current_weight` for every
/// server, select the max, then subtract the total weight from it. This
/// spaces picks proportionally instead of bursting through one server's
/// full weight before moving to the next.
pub struct RoundRobinBalancer {
    state: Mutex<Vec<WeightEntry>>,
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self {
            state: Mutex::new(Vec::new()),
        }
    }
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instance list. `effective_weight` is preserved (keyed by
    /// endpoint) across updates so an in-progress decay/recovery streak
    /// survives a config reload; new instances start at their full weight.
    pub fn update_instances(&self, instances: Vec<UpstreamInstance>) {
        let mut state = self.state.lock().unwrap();
        let prev: std::collections::HashMap<String, i64> = state
            .iter()
            .map(|e| (e.instance.endpoint().to_string(), e.effective_weight))
            .collect();
        *state = instances
            .into_iter()
            .map(|inst| {
                let weight = inst.weight as i64;
                let effective_weight = prev.get(inst.endpoint()).copied().unwrap_or(weight);
                WeightEntry {
                    instance: inst,
                    weight,
                    effective_weight,
                    current_weight: 0,
                }
            })
            .collect();
    }

    pub fn do_select(&self) -> Option<UpstreamInstance> {
        let mut state = self.state.lock().unwrap();
        if state.is_empty() {
            return None;
        }
        let total: i64 = state.iter().map(|e| e.effective_weight).sum();
        if total <= 0 {
            return None;
        }
        for e in state.iter_mut() {
            e.current_weight += e.effective_weight;
        }
        let best_idx = state
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.current_weight)
            .map(|(i, _)| i)?;
        state[best_idx].current_weight -= total;
        Some(state[best_idx].instance.clone())
    }

    /// Decay a server's effective_weight after an RPC failure, floored at 1
    /// so a server is never permanently excluded by weight alone — the
    /// availability predicate is what actually removes it from selection.
    pub fn record_failure(&self, endpoint: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.iter_mut().find(|e| e.instance.endpoint() == endpoint) {
            e.effective_weight = (e.effective_weight - 1).max(1);
        }
    }

    /// Recover a server's effective_weight by one step toward its
    /// configured weight after a successful RPC.
    pub fn record_success(&self, endpoint: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.iter_mut().find(|e| e.instance.endpoint() == endpoint) {
            if e.effective_weight < e.weight {
                e.effective_weight += 1;
            }
        }
    }

    pub fn get_instances(&self) -> Vec<UpstreamInstance> {
        self.state
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.instance.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn inst(host: &str, weight: u32) -> UpstreamInstance {
        let endpoint: Arc<str> = format!("{}:{}", host, 80).into();
        UpstreamInstance {
            host: host.to_string(),
            port: 80,
            weight,
            metadata: HashMap::new(),
            active_requests: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            endpoint,
        }
    }

    #[test]
    fn test_uniform() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 100), inst("B", 100)]);
        let mut counts = HashMap::new();
        for _ in 0..1000 {
            let i = lb.do_select().unwrap();
            *counts.entry(i.host.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts["A"], 500);
        assert_eq!(counts["B"], 500);
    }

    #[test]
    fn test_weighted() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 2), inst("B", 3)]);
        let mut counts = HashMap::new();
        for _ in 0..5000 {
            let i = lb.do_select().unwrap();
            *counts.entry(i.host.clone()).or_insert(0) += 1;
        }
        assert_eq!(counts["A"], 2000);
        assert_eq!(counts["B"], 3000);
    }

    #[test]
    fn test_smooth_spacing_no_bursts() {
        // With weights 5:1, naive expansion would emit AAAAAB; smooth-WRR
        // must not pick the same server more than twice in a row.
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 5), inst("B", 1)]);
        let mut run = 0;
        let mut last = String::new();
        let mut max_run = 0;
        for _ in 0..60 {
            let host = lb.do_select().unwrap().host;
            if host == last {
                run += 1;
            } else {
                run = 1;
                last = host;
            }
            max_run = max_run.max(run);
        }
        assert!(max_run <= 2, "max consecutive run was {}", max_run);
    }

    #[test]
    fn test_empty() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![]);
        assert!(lb.do_select().is_none());
    }

    #[test]
    fn test_single() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 100)]);
        for _ in 0..100 {
            assert_eq!(lb.do_select().unwrap().host, "A");
        }
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 0), inst("B", 1)]);
        for _ in 0..50 {
            assert_eq!(lb.do_select().unwrap().host, "B");
        }
    }

    #[test]
    fn test_all_zero_weight_returns_none() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 0), inst("B", 0)]);
        assert!(lb.do_select().is_none());
    }

    #[test]
    fn test_failure_decays_then_recovers() {
        let lb = RoundRobinBalancer::new();
        lb.update_instances(vec![inst("A", 10), inst("B", 10)]);
        let a_endpoint = "A:80";
        for _ in 0..5 {
            lb.record_failure(a_endpoint);
        }
        // Effective weight floored at 1, far below B's 10 — B should now
        // dominate selection.
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..22 {
            *counts.entry(lb.do_select().unwrap().host).or_insert(0) += 1;
        }
        assert!(counts.get("B").copied().unwrap_or(0) > counts.get("A").copied().unwrap_or(0));

        for _ in 0..20 {
            lb.record_success(a_endpoint);
        }
        let mut counts2: HashMap<String, u32> = HashMap::new();
        for _ in 0..20 {
            *counts2.entry(lb.do_select().unwrap().host).or_insert(0) += 1;
        }
        assert_eq!(counts2["A"], 10);
        assert_eq!(counts2["B"], 10);
    }
}
