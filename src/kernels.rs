//! Cache of per-shape kernel plans.
//!
//! The data-parallel kernels (pyramid filtering, projection, correlation
//! search) precompute layout information that depends only on the problem
//! shape. Plans are built once per [`KernelKey`] and reused until the shape
//! changes.

use std::collections::HashMap;

use tracing::debug;

/// Which kernel a plan belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelOp {
    Pyramid,
    Projection,
    Correlation,
}

/// Cache key: operation plus the shape the plan was synthesized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub op: KernelOp,
    pub width: usize,
    pub height: usize,
}

impl KernelKey {
    pub fn new(op: KernelOp, width: usize, height: usize) -> Self {
        Self { op, width, height }
    }
}

/// Plans keyed by [`KernelKey`].
#[derive(Debug)]
pub struct KernelCache<T> {
    plans: HashMap<KernelKey, T>,
}

impl<T> Default for KernelCache<T> {
    fn default() -> Self {
        Self {
            plans: HashMap::new(),
        }
    }
}

impl<T> KernelCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the plan for `key`, synthesizing it with `build` on first use.
    pub fn get_or_build(&mut self, key: KernelKey, build: impl FnOnce() -> T) -> &T {
        self.plans.entry(key).or_insert_with(|| {
            debug!(?key, "synthesizing kernel plan");
            build()
        })
    }

    pub fn contains(&self, key: &KernelKey) -> bool {
        self.plans.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_built_once_per_shape() {
        let mut cache = KernelCache::new();
        let mut builds = 0;
        let key = KernelKey::new(KernelOp::Pyramid, 640, 480);

        for _ in 0..3 {
            let plan = cache.get_or_build(key, || {
                builds += 1;
                vec![1u32, 2, 3]
            });
            assert_eq!(plan.len(), 3);
        }
        assert_eq!(builds, 1);

        cache.get_or_build(KernelKey::new(KernelOp::Pyramid, 320, 240), Vec::new);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key));
    }
}
