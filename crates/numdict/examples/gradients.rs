//! Fitting a small weight dictionary with tape gradients.
//!
//! Builds a toy regression: activations flow through a weight numdict,
//! the squared error against a target is differentiated on a
//! `GradientTape`, and the weights are nudged downhill with a
//! `MutableNumDict` accumulator.
//!
//! Run with: `cargo run --example gradients`

use clarion_numdict::{GradientTape, MutableNumDict, NumDict};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let input = NumDict::from_pairs([("red", 1.0), ("round", 1.0), ("heavy", 0.0)], None);
    let target = NumDict::from_pairs([("apple", 0.9)], None);

    let mut weights = MutableNumDict::from_pairs(
        [("red", 0.1), ("round", 0.1), ("heavy", 0.1)],
        None,
    );

    for step in 0..50 {
        let mut tape = GradientTape::new();
        let x = tape.variable(input.clone());
        let w = tape.variable(weights.snapshot());
        let t = tape.variable(target.clone());

        // prediction = sum of weighted feature activations
        let weighted = tape.mul(x, w)?;
        let prediction = tape.sum_by(weighted, |_| "apple")?;

        // loss = (prediction - target)^2
        let diff = tape.sub(prediction, t)?;
        let loss = tape.mul(diff, diff)?;

        let (loss_value, grads) = tape.gradients(loss, &[w])?;
        weights.sub_assign(&grads[0].scale(0.5))?;

        if step % 10 == 0 {
            println!(
                "step {:>2}  loss {:.6}  weights {}",
                step,
                loss_value.get(&"apple")?,
                weights
            );
        }
    }

    let fitted = input.mul(&weights.snapshot())?.sum_by(|_| "apple");
    println!("fitted prediction: {}", fitted);
    Ok(())
}
