//! A minimal free-association agent.
//!
//! A stimulus buffer activates features, an associative flow maps them
//! onto chunks, and a response unit samples one chunk from a Boltzmann
//! distribution over the chunk activations. The whole agent is wired
//! with relative addresses and stepped for a handful of cycles.
//!
//! Run with: `cargo run --example free_association`

use clarion_core::{
    agent, chunk, feature, Activation, Inputs, MutableNumDict, Process, ProcessError, Structure,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Fixed external stimulus.
struct Stimulus(Activation);

impl Process for Stimulus {
    fn call(&mut self, _inputs: &Inputs) -> Result<Activation, ProcessError> {
        Ok(self.0.clone())
    }
}

/// Feature-to-chunk associative flow with a fixed weight dictionary.
struct Associations {
    weights: MutableNumDict<(String, String)>,
}

impl Process for Associations {
    fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError> {
        let features = inputs.pool_max();
        let mut scores: MutableNumDict<String> = MutableNumDict::new();
        for ((f, c), w) in self.weights.iter() {
            let x = features.value(&feature(f.clone())).unwrap_or(0.0);
            let prev = scores.value(c).unwrap_or(0.0);
            scores.insert(c.clone(), prev + w * x);
        }
        Ok(Activation::from_pairs(
            scores.iter().map(|(c, v)| (chunk(c.clone()), *v)),
            None,
        ))
    }
}

/// Samples one response chunk per cycle from a Boltzmann distribution.
struct Responder {
    temperature: f64,
    rng: StdRng,
}

impl Process for Responder {
    fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError> {
        let scores = inputs.at(0).cloned().unwrap_or_default();
        if scores.is_empty() {
            return Ok(Activation::new());
        }
        let probs = scores.boltzmann(self.temperature)?;
        Ok(probs.draw(&mut self.rng))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows assembly and cycle events.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut alice = Structure::new(agent("alice"));
    alice.assemble(|scope| {
        scope.add_construct(
            "stimulus",
            Stimulus(Activation::from_pairs(
                [(feature("fruit"), 1.0), (feature("red"), 0.6)],
                None,
            )),
            &[],
            &[],
        )?;
        scope.add_structure("nacs", |nacs| {
            nacs.add_construct(
                "assoc",
                Associations {
                    weights: MutableNumDict::from_pairs(
                        [
                            (("fruit".into(), "apple".into()), 0.8),
                            (("fruit".into(), "banana".into()), 0.7),
                            (("red".into(), "apple".into()), 0.5),
                            (("red".into(), "firetruck".into()), 0.9),
                        ],
                        None,
                    ),
                },
                &["../stimulus"],
                &[],
            )?;
            nacs.add_construct(
                "response",
                Responder {
                    temperature: 0.4,
                    rng: StdRng::seed_from_u64(7),
                },
                &["assoc"],
                &[],
            )
        })
    })?;

    for cycle in 1..=5 {
        alice.step()?;
        let response = alice.output("nacs/response")?;
        let picked = response
            .iter()
            .find(|(_, v)| **v > 0.0)
            .map(|(k, _)| k.to_string())
            .unwrap_or_else(|| "(nothing)".to_string());
        println!("cycle {cycle}: {picked}");
    }
    println!("scores: {}", alice.output("nacs/assoc")?);
    Ok(())
}
