use super::{Collective, Result};

/// The group of a single, non distributed, worker. Reductions are the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Solo;

impl Collective for Solo {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_mean(&mut self, _values: &mut [f32]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_leaves_values_untouched() {
        let mut values = [0.1, 2.5, -3.0];
        Solo.all_reduce_mean(&mut values).unwrap();
        assert_eq!(values, [0.1, 2.5, -3.0]);
    }
}
