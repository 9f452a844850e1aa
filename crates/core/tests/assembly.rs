//! End-to-end assembly and cycle tests: a small two-subsystem agent
//! wired with relative addresses, stepped over several cycles.

use clarion_core::{
    agent, chunk, feature, Activation, AssemblyError, Inputs, MutableNumDict, Process,
    ProcessError, Structure,
};
use clarion_numdict::NumDict;

/// Clamped external stimulus buffer.
struct Stimulus {
    current: Activation,
}

impl Stimulus {
    fn new(pairs: &[(&str, f64)]) -> Self {
        Self {
            current: Activation::from_pairs(
                pairs.iter().map(|(id, v)| (feature(*id), *v)),
                None,
            ),
        }
    }
}

impl Process for Stimulus {
    fn call(&mut self, _inputs: &Inputs) -> Result<Activation, ProcessError> {
        Ok(self.current.clip(0.0, 1.0))
    }
}

/// Associative flow: weighted sum of input activations into chunk
/// activations, weights keyed by (feature id, chunk id).
struct Associations {
    weights: MutableNumDict<(String, String)>,
}

impl Associations {
    fn new(weights: &[(&str, &str, f64)]) -> Self {
        Self {
            weights: MutableNumDict::from_pairs(
                weights
                    .iter()
                    .map(|(f, c, w)| ((f.to_string(), c.to_string()), *w)),
                None,
            ),
        }
    }
}

impl Process for Associations {
    fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError> {
        let pooled = inputs.pool_max();
        let mut scores: MutableNumDict<String> = MutableNumDict::new();
        for ((f, c), w) in self.weights.iter() {
            let x = pooled.value(&feature(f.clone())).unwrap_or(0.0);
            let prev = scores.value(c).unwrap_or(0.0);
            scores.insert(c.clone(), prev + w * x);
        }
        Ok(Activation::from_pairs(
            scores.iter().map(|(c, v)| (chunk(c.clone()), *v)),
            None,
        ))
    }

    fn validate(&self) -> Result<(), ProcessError> {
        if self.weights.is_empty() {
            return Err(ProcessError::new("no associations configured"));
        }
        Ok(())
    }
}

/// Picks the strongest chunk above a threshold.
struct Selector {
    threshold: f64,
}

impl Process for Selector {
    fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError> {
        let scores = inputs.at(0).cloned().unwrap_or_default();
        let above = scores.threshold(self.threshold);
        let best = above.val_max().unwrap_or(f64::NEG_INFINITY);
        Ok(above.keep(|k| above.value(k) == Some(best)))
    }
}

fn demo_agent() -> Structure {
    let mut s = Structure::new(agent("demo"));
    s.assemble(|scope| {
        scope.add_construct(
            "stimulus",
            Stimulus::new(&[("red", 1.0), ("round", 0.8), ("heavy", 1.5)]),
            &[],
            &[],
        )?;
        scope.add_structure("nacs", |nacs| {
            nacs.add_construct(
                "assoc",
                Associations::new(&[
                    ("red", "apple", 0.6),
                    ("round", "apple", 0.5),
                    ("heavy", "anvil", 0.9),
                    ("red", "brick", 0.3),
                ]),
                &["../stimulus"],
                &[],
            )?;
            nacs.add_construct("choice", Selector { threshold: 0.5 }, &["assoc"], &[])
        })
    })
    .expect("assembly failed");
    s
}

#[test]
fn activation_propagates_through_the_hierarchy() {
    let mut s = demo_agent();
    s.step().unwrap();

    // stimulus clamps heavy to 1.0
    let stim = s.output("stimulus").unwrap();
    assert_eq!(stim.get(&feature("heavy")).unwrap(), 1.0);

    // assoc sees the same-cycle stimulus: apple = 0.6 + 0.4, anvil = 0.9
    let scores = s.output("nacs/assoc").unwrap();
    assert!((scores.get(&chunk("apple")).unwrap() - 1.0).abs() < 1e-12);
    assert_eq!(scores.get(&chunk("anvil")).unwrap(), 0.9);
    assert_eq!(scores.get(&chunk("brick")).unwrap(), 0.3);

    // choice keeps only the argmax above threshold
    let choice = s.output("nacs/choice").unwrap();
    assert_eq!(choice.len(), 1);
    assert!(choice.contains(&chunk("apple")));
}

#[test]
fn cycles_are_reproducible() {
    let mut a = demo_agent();
    let mut b = demo_agent();
    for _ in 0..5 {
        a.step().unwrap();
        b.step().unwrap();
    }
    assert_eq!(a.output("nacs/choice").unwrap(), b.output("nacs/choice").unwrap());
    assert_eq!(a.cycles(), 5);
}

#[test]
fn constant_source_reaches_a_two_hop_consumer_in_two_cycles() {
    // choice reads assoc within the same cycle (declared after), so the
    // full stimulus -> assoc -> choice path settles in one step; a
    // consumer declared BEFORE its producer needs a second cycle.
    struct Echo;
    impl Process for Echo {
        fn call(&mut self, inputs: &Inputs) -> Result<Activation, ProcessError> {
            Ok(inputs.at(0).cloned().unwrap_or_default())
        }
    }

    let mut s = Structure::new(agent("lagged"));
    s.assemble(|scope| {
        scope.add_construct("early", Echo, &["../late"], &[])?;
        scope.add_construct("late", Stimulus::new(&[("red", 1.0)]), &[], &[])
    })
    .unwrap();

    s.step().unwrap();
    assert!(s.output("early").unwrap().is_empty());
    s.step().unwrap();
    assert_eq!(
        s.output("early").unwrap().get(&feature("red")).unwrap(),
        1.0
    );
}

#[test]
fn validation_failures_surface_with_the_member_path() {
    let mut s = Structure::new(agent("demo"));
    let err = s
        .assemble(|scope| {
            scope.add_structure("nacs", |nacs| {
                nacs.add_construct("assoc", Associations::new(&[]), &[], &[])
            })
        })
        .unwrap_err();
    match err {
        AssemblyError::Validation { path, reason } => {
            assert_eq!(path, "/nacs/assoc");
            assert!(reason.contains("no associations"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn outputs_are_addressable_but_unknown_paths_fail() {
    let s = demo_agent();
    assert!(s.output("nacs/assoc").is_ok());
    assert!(s.output("/nacs/assoc").is_ok());
    assert!(matches!(
        s.output("nacs/missing"),
        Err(AssemblyError::UnresolvedAddress { .. })
    ));
    assert!(matches!(
        s.output("a//b"),
        Err(AssemblyError::MalformedAddress { .. })
    ));
}

#[test]
fn assets_are_shared_across_handles() {
    let s = demo_agent();
    let assets = s.assets();
    assets.insert("chunk-db", vec![chunk("apple"), chunk("anvil")]);
    let again = s.assets();
    let db = again.get::<Vec<clarion_core::ConstructSymbol>>("chunk-db");
    assert_eq!(db.map(|v| v.len()), Some(2));
}

#[test]
fn symbol_keys_survive_numdict_arithmetic() {
    // Symbols key numdicts across tuple and lag transforms.
    let now = Activation::from_pairs([(chunk("apple"), 0.9), (chunk("pear"), 0.4)], None);
    let before = now.transform_keys(|k| k.lagged(1));
    assert_eq!(before.get(&chunk("apple").lagged(1)).unwrap(), 0.9);

    let pairs: NumDict<(clarion_core::ConstructSymbol, clarion_core::ConstructSymbol)> =
        NumDict::from_pairs([((chunk("apple"), feature("red")), 0.7)], None);
    assert_eq!(
        pairs.get(&(chunk("apple"), feature("red"))).unwrap(),
        0.7
    );
}
