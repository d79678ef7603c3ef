//! Per-voice reverbs prepared ahead of triggers.
//!
//! Generating a voice's impulse response and transforming its partitions
//! is the costly part of building a voice. A worker thread keeps a bounded
//! queue of ready reverbs, so the control thread only takes one. Reverbs
//! come out in seed order whether they were prepared or generated on
//! demand, so a run is reproducible either way.

use std::thread;

use crossbeam_channel::Receiver;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::effects::ChainParams;
use super::reverb::ConvolutionReverb;

/// The seed for the `n`th voice reverb drawn from `base`.
pub fn voice_seed(base: u64, n: u64) -> u64 {
    base ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn generate(params: &ChainParams, seed: u64) -> ConvolutionReverb {
    params.reverb(&mut StdRng::seed_from_u64(seed))
}

#[derive(Debug)]
pub struct ReverbPool {
    params: ChainParams,
    seed: u64,
    taken: u64,
    ready: Option<Receiver<ConvolutionReverb>>,
}

impl ReverbPool {
    /// Start a worker keeping up to `capacity` reverbs ready. The worker
    /// exits once the pool is dropped.
    pub fn spawn(params: ChainParams, seed: u64, capacity: usize) -> Self {
        if capacity == 0 {
            return Self::on_demand(params, seed);
        }
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let spawned = thread::Builder::new()
            .name("drumgrid-reverb".into())
            .spawn(move || {
                for n in 1u64.. {
                    if tx.send(generate(&params, voice_seed(seed, n))).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(_) => ReverbPool {
                params,
                seed,
                taken: 0,
                ready: Some(rx),
            },
            Err(e) => {
                log::warn!("reverb worker unavailable, generating on demand: {e}");
                Self::on_demand(params, seed)
            }
        }
    }

    /// A pool without a worker: every reverb is generated when taken.
    pub fn on_demand(params: ChainParams, seed: u64) -> Self {
        ReverbPool {
            params,
            seed,
            taken: 0,
            ready: None,
        }
    }

    /// Reverbs that can be taken without waiting.
    pub fn available(&self) -> usize {
        self.ready.as_ref().map_or(0, Receiver::len)
    }

    /// The next reverb and the seed its response was drawn from. Waits for
    /// the worker when nothing is ready yet.
    pub fn take(&mut self) -> (u64, ConvolutionReverb) {
        self.taken += 1;
        let seed = voice_seed(self.seed, self.taken);
        match self.ready.as_ref().map(Receiver::recv) {
            Some(Ok(reverb)) => return (seed, reverb),
            Some(Err(_)) => {
                log::warn!("reverb worker stopped, generating on demand");
                self.ready = None;
            }
            None => {}
        }
        (seed, generate(&self.params, seed))
    }
}
