use std::{
    num::NonZeroUsize,
    sync::{Arc, Barrier},
};

use log::{trace, warn};
use parking_lot::Mutex;

use super::Collective;
use crate::{Result, TrainErr, state::Info, tree::Params};

/// Values that can be averaged across replicas.
trait Reducible: Clone {
    fn accumulate(&mut self, other: &Self) -> Result<()>;
    fn scale(&mut self, factor: f32);
}

impl Reducible for Params {
    fn accumulate(&mut self, other: &Self) -> Result<()> {
        *self = self.plus(other, "replica tree")?;
        Ok(())
    }

    fn scale(&mut self, factor: f32) {
        *self = self.scaled(factor);
    }
}

impl Reducible for Info {
    fn accumulate(&mut self, other: &Self) -> Result<()> {
        if let Some(key) = self
            .keys()
            .find(|k| !other.contains_key(*k))
            .or_else(|| other.keys().find(|k| !self.contains_key(*k)))
        {
            return Err(TrainErr::StructureMismatch {
                what: "replica info",
                path: key.clone(),
            });
        }

        for (key, value) in self.iter_mut() {
            *value += other[key];
        }

        Ok(())
    }

    fn scale(&mut self, factor: f32) {
        self.values_mut().for_each(|v| *v *= factor);
    }
}

/// The accumulated contributions of a single collective call.
struct Round<V> {
    sum: Option<V>,
    failure: Option<String>,
}

impl<V> Default for Round<V> {
    fn default() -> Self {
        Self {
            sum: None,
            failure: None,
        }
    }
}

struct Shared {
    name: String,
    size: usize,
    barrier: Barrier,
    trees: Mutex<Round<Params>>,
    infos: Mutex<Round<Info>>,
}

/// An in-process `Collective` for replicas running on separate threads.
///
/// Every replica holds a clone of the same `ReplicaAxis`. A reduction runs in three barrier
/// separated phases: every replica adds its value to a shared sum, then every replica reads
/// the mean, then the sum is cleared for the next call.
#[derive(Clone)]
pub struct ReplicaAxis {
    shared: Arc<Shared>,
}

impl ReplicaAxis {
    /// Creates a new `ReplicaAxis`.
    ///
    /// # Arguments
    /// * `name` - The name of the axis.
    /// * `size` - The amount of replicas that will take part in every reduction.
    ///
    /// # Returns
    /// A new `ReplicaAxis` instance, clone it once per replica.
    pub fn new(name: impl Into<String>, size: NonZeroUsize) -> Self {
        let size = size.get();

        let shared = Shared {
            name: name.into(),
            size,
            barrier: Barrier::new(size),
            trees: Mutex::new(Round::default()),
            infos: Mutex::new(Round::default()),
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    fn all_mean<V: Reducible>(&self, slot: &Mutex<Round<V>>, value: &V) -> Result<V> {
        let Shared {
            ref name,
            size,
            ref barrier,
            ..
        } = *self.shared;

        {
            let mut round = slot.lock();
            let Round { sum, failure } = &mut *round;

            if failure.is_none() {
                match sum.take() {
                    None => *sum = Some(value.clone()),
                    Some(mut acc) => {
                        if let Err(e) = acc.accumulate(value) {
                            *failure = Some(e.to_string());
                        }
                        *sum = Some(acc);
                    }
                }
            }
        }

        trace!(axis = name.as_str(); "contributed to collective round");
        barrier.wait();

        let result = {
            let round = slot.lock();

            match (&round.failure, &round.sum) {
                (Some(detail), _) => Err(TrainErr::Collective {
                    axis: name.clone(),
                    detail: detail.clone(),
                }),
                (None, Some(sum)) => {
                    let mut mean = sum.clone();
                    mean.scale(1. / size as f32);
                    Ok(mean)
                }
                (None, None) => Err(TrainErr::Collective {
                    axis: name.clone(),
                    detail: "no replica contributed to the round".into(),
                }),
            }
        };

        if barrier.wait().is_leader() {
            *slot.lock() = Round::default();
        }
        barrier.wait();

        if let Err(e) = &result {
            warn!("collective round failed: {e}");
        }

        result
    }
}

impl Collective for ReplicaAxis {
    fn axis_name(&self) -> &str {
        &self.shared.name
    }

    fn axis_size(&self) -> usize {
        self.shared.size
    }

    fn pmean(&self, tree: &Params) -> Result<Params> {
        self.all_mean(&self.shared.trees, tree)
    }

    fn pmean_info(&self, info: &Info) -> Result<Info> {
        self.all_mean(&self.shared.infos, info)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::tree::Tree;

    fn axis(size: usize) -> ReplicaAxis {
        ReplicaAxis::new("batch", NonZeroUsize::new(size).unwrap())
    }

    #[test]
    fn single_replica_mean_is_identity() {
        let axis = axis(1);
        let tree = Tree::mapping([("w", Tree::scalar(3.))]);

        assert_eq!(axis.pmean(&tree).unwrap(), tree);
        assert_eq!(axis.axis_name(), "batch");
        assert_eq!(axis.axis_size(), 1);
    }

    #[test]
    fn replicas_agree_on_the_mean() {
        const REPLICAS: usize = 4;
        let axis = axis(REPLICAS);

        let means: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..REPLICAS)
                .map(|i| {
                    let axis = axis.clone();
                    s.spawn(move || {
                        let tree = Tree::mapping([("w", Tree::scalar(i as f32))]);
                        axis.pmean(&tree)
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for mean in means {
            assert_eq!(mean.unwrap(), Tree::mapping([("w", Tree::scalar(1.5))]));
        }
    }

    #[test]
    fn consecutive_rounds_do_not_leak() {
        const REPLICAS: usize = 3;
        let axis = axis(REPLICAS);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..REPLICAS)
                .map(|i| {
                    let axis = axis.clone();
                    s.spawn(move || {
                        let first = axis.pmean(&Tree::scalar(i as f32)).unwrap();
                        let second = axis.pmean(&Tree::scalar(10.)).unwrap();
                        (first, second)
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (first, second) in results {
            assert_eq!(first, Tree::scalar(1.));
            assert_eq!(second, Tree::scalar(10.));
        }
    }

    #[test]
    fn mismatched_trees_fail_on_every_replica() {
        let axis = axis(2);

        let results: Vec<_> = thread::scope(|s| {
            let a = {
                let axis = axis.clone();
                s.spawn(move || axis.pmean(&Tree::mapping([("w", Tree::scalar(1.))])))
            };
            let b = {
                let axis = axis.clone();
                s.spawn(move || axis.pmean(&Tree::mapping([("v", Tree::scalar(1.))])))
            };

            vec![a.join().unwrap(), b.join().unwrap()]
        });

        for res in results {
            assert!(matches!(res, Err(TrainErr::Collective { axis, .. }) if axis == "batch"));
        }

        // the failed round is cleared, the axis stays usable
        let (mine, other) = thread::scope(|s| {
            let other = axis.clone();
            let h = s.spawn(move || other.pmean(&Tree::scalar(4.)));
            (axis.pmean(&Tree::scalar(2.)), h.join().unwrap())
        });

        assert_eq!(mine.unwrap(), Tree::scalar(3.));
        assert_eq!(other.unwrap(), Tree::scalar(3.));
    }

    #[test]
    fn mismatched_info_keys_fail_on_every_replica() {
        let axis = axis(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = ["loss", "accuracy"]
                .into_iter()
                .map(|key| {
                    let axis = axis.clone();
                    s.spawn(move || axis.pmean_info(&Info::from([(key.to_string(), 1.)])))
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for res in results {
            assert!(matches!(res, Err(TrainErr::Collective { ref detail, .. }) if detail.contains("replica info")));
        }

        let (mine, other) = thread::scope(|s| {
            let other = axis.clone();
            let h = s.spawn(move || other.pmean_info(&Info::from([("loss".to_string(), 3.)])));
            (
                axis.pmean_info(&Info::from([("loss".to_string(), 1.)])),
                h.join().unwrap(),
            )
        });

        assert_eq!(mine.unwrap()["loss"], 2.);
        assert_eq!(other.unwrap()["loss"], 2.);
    }

    #[test]
    fn info_is_averaged_per_key() {
        let axis = axis(2);

        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = [1., 3.]
                .into_iter()
                .map(|loss| {
                    let axis = axis.clone();
                    s.spawn(move || {
                        let info = Info::from([("loss".to_string(), loss)]);
                        axis.pmean_info(&info)
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for info in results {
            assert_eq!(info.unwrap()["loss"], 2.);
        }
    }
}
