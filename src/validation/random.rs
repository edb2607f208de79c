//! Random and exhaustive input generation for fast validation

use crate::ir::{Binding, Type, Value};
use rand::Rng;

/// Draw one binding. Booleans take the low bit of an integer draw, so the
/// generator advances identically for every variable regardless of type.
pub fn random_binding<R: Rng>(vars: &[(String, Type)], rng: &mut R, min: i64, max: i64) -> Binding {
    vars.iter()
        .map(|(name, ty)| {
            let v = rng.random_range(min..=max);
            let value = match ty {
                Type::Int => Value::Int(v),
                Type::Bool => Value::Bool(v & 1 == 1),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Every binding of `vars` over `[min, max]` (booleans take both values).
/// The grid grows exponentially, so callers keep the variable count small.
pub fn grid_inputs(vars: &[(String, Type)], min: i64, max: i64) -> Vec<Binding> {
    let mut grid = vec![Binding::new()];
    for (name, ty) in vars {
        let values: Vec<Value> = match ty {
            Type::Int => (min..=max).map(Value::Int).collect(),
            Type::Bool => vec![Value::Bool(false), Value::Bool(true)],
        };
        grid = grid
            .into_iter()
            .flat_map(|b| {
                values.iter().map(move |v| {
                    let mut next = b.clone();
                    next.insert(name.clone(), *v);
                    next
                })
            })
            .collect();
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn vars(names: &[(&str, Type)]) -> Vec<(String, Type)> {
        names.iter().map(|(n, t)| (n.to_string(), *t)).collect()
    }

    #[test]
    fn test_random_binding_in_range_and_seeded() {
        let v = vars(&[("x", Type::Int), ("b", Type::Bool)]);
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..20).map(|_| random_binding(&v, &mut rng, -2, 2)).collect::<Vec<_>>()
        };
        let inputs = draw(0);
        for input in &inputs {
            let x = input["x"].as_int().unwrap();
            assert!((-2..=2).contains(&x));
            assert!(input["b"].as_bool().is_some());
        }
        assert_eq!(inputs, draw(0));
        let unique: std::collections::BTreeSet<_> = inputs.iter().map(|b| b["x"]).collect();
        assert!(unique.len() > 1);
    }

    #[test]
    fn test_grid_inputs() {
        let grid = grid_inputs(&vars(&[("x", Type::Int), ("b", Type::Bool)]), -1, 1);
        assert_eq!(grid.len(), 6);
        assert!(grid.iter().any(|g| g["x"] == Value::Int(-1) && g["b"] == Value::Bool(true)));
        assert_eq!(grid_inputs(&[], 0, 5).len(), 1);
    }
}
