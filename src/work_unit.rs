use std::hint::black_box;

const SEED: u32 = !0;
const OUTER: u32 = 100;
const INNER: u32 = 10;
const MULTIPLIER: u32 = 0x9e37_79b1;

/// One unit of load: a short integer mixing loop. No I/O, no allocation,
/// so a thread running it never suspends voluntarily.
#[inline(never)]
pub fn work_unit() -> u32 {
    mix(black_box(SEED))
}

/// The loop behind [`work_unit`]. Every step goes through `black_box`, so
/// the chain cannot be folded into a constant even for a known seed.
#[inline(never)]
pub fn mix(seed: u32) -> u32 {
    let mut x = seed;
    for i in 0..OUTER {
        for j in 0..INNER {
            x = black_box(x.rotate_left(5) ^ x.wrapping_mul(MULTIPLIER).wrapping_add(i ^ j));
        }
    }
    x
}

/// Runs `units` work units back to back.
pub fn run_units(units: u64) {
    for _ in 0..units {
        black_box(work_unit());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn work_unit_is_deterministic() {
        assert_eq!(work_unit(), work_unit());
        assert_eq!(work_unit(), mix(SEED));
    }

    #[test]
    fn result_depends_on_the_seed() {
        let results: Vec<u32> = [0, 1, 12345, !0].into_iter().map(mix).collect();
        for (n, a) in results.iter().enumerate() {
            for b in &results[n + 1..] {
                assert_ne!(a, b, "{results:?}");
            }
        }
    }

    #[test]
    fn a_unit_is_more_than_a_call() {
        // a thousand dependent steps cannot finish in under 10ns
        let start = Instant::now();
        run_units(100_000);
        let elapsed = start.elapsed();
        assert!(elapsed > Duration::from_millis(1), "{elapsed:?}");
    }

    #[test]
    fn more_units_take_longer() {
        let start = Instant::now();
        run_units(10);
        let short = start.elapsed();

        let start = Instant::now();
        run_units(100_000);
        let long = start.elapsed();

        assert!(long > short);
    }

    #[test]
    fn zero_units_is_a_no_op() {
        run_units(0);
    }
}
