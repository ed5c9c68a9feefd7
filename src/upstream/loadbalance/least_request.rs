use super::UpstreamInstance;
use arc_swap::ArcSwap;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// P2C (Power of Two Random Choices) Load Balancer.
///
/// Randomly pick two instances, compare `score = active_requests / weight`,
/// select the one with the lower score. O(1) per selection.
pub struct LeastRequestBalancer {
    instances: ArcSwap<Vec<UpstreamInstance>>,
}

impl Default for LeastRequestBalancer {
    fn default() -> Self {
        Self {
            instances: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

impl LeastRequestBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_instances(&self, instances: Vec<UpstreamInstance>) {
        let old = self.instances.load();
        let new_instances: Vec<UpstreamInstance> = instances
            .into_iter()
            .map(|mut inst| {
                if let Some(existing) = old.iter().find(|e| e.endpoint() == inst.endpoint()) {
                    inst.active_requests = existing.active_requests.clone();
                }
                inst
            })
            .collect();
        self.instances.store(Arc::new(new_instances));
    }

    #[inline]
    fn score(inst: &UpstreamInstance) -> f64 {
        let active = inst.active_requests.load(Ordering::Relaxed);
        let weight = inst.weight.max(1) as f64;
        active as f64 / weight
    }

    pub fn do_select(&self) -> Option<UpstreamInstance> {
        let instances = self.instances.load();
        let len = instances.len();
        match len {
            0 => None,
            1 => Some(instances[0].clone()),
            _ => {
                let mut rng = rand::thread_rng();
                let idx1 = rng.gen_range(0..len);
                let idx2 = {
                    let offset = rng.gen_range(1..len);
                    (idx1 + offset) % len
                };
                if Self::score(&instances[idx1]) <= Self::score(&instances[idx2]) {
                    Some(instances[idx1].clone())
                } else {
                    Some(instances[idx2].clone())
                }
            }
        }
    }

    pub fn get_instances(&self) -> Vec<UpstreamInstance> {
        self.instances.load().as_ref().clone()
    }

    #[cfg(test)]
    pub fn get_active_count(&self, endpoint: &str) -> usize {
        self.instances
            .load()
            .iter()
            .find(|i| i.endpoint() == endpoint)
            .map(|i| i.active_requests.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
