//! Integer duration redistribution over per-state frame counts.
//!
//! Frame counts are scaled toward a target duration in milliseconds using
//! fixed-point arithmetic; instead of rounding each state, the remainder is
//! carried to the next state (and across calls via `rest_ms`), so the total
//! never drifts.

/// Number of fractional bits for fixed-point calculation.
pub const PRECISION: u32 = 10;
/// Constant 0.5 in `PRECISION` fixed point.
pub const PREC_HALF: i32 = 512;

fn trans_dur_uniform(
    frame_dur_exp: u8,
    inout: &mut [u8],
    input_dur: i32,
    target_dur: i32,
    rest_ms: &mut i16,
) {
    let shift = PRECISION - frame_dur_exp as u32;
    let mut rest = (*rest_ms as i32) << shift;
    // full-precision ratio: frame counts scale by target/input
    let fact = (target_dur << PRECISION) / input_dur;

    for state in inout.iter_mut() {
        rest += fact * (*state as i32);
        // instead of rounding, carry the rest to the next state
        let out = (rest >> PRECISION).clamp(0, 255);
        rest -= out << PRECISION;
        *state = out as u8;
    }
    *rest_ms = (rest >> shift) as i16;
}

fn trans_dur_weighted(
    frame_dur_exp: u8,
    inout: &mut [u8],
    weights: &[u16],
    input_dur: i32,
    target_dur: i32,
    rest_ms: &mut i16,
) {
    let shift = PRECISION - frame_dur_exp as u32;
    let weighted_sum: i32 = inout
        .iter()
        .zip(weights)
        .map(|(&f, &w)| f as i32 * w as i32)
        .sum();
    if weighted_sum == 0 {
        trans_dur_uniform(frame_dur_exp, inout, input_dur, target_dur, rest_ms);
        return;
    }

    let mut rest = (*rest_ms as i32) << shift;
    // additive change factor in PRECISION fixed point
    let fact = if target_dur > input_dur {
        ((target_dur - input_dur) << shift) / weighted_sum
    } else {
        -(((input_dur - target_dur) << shift) / weighted_sum)
    };

    for (state, &w) in inout.iter_mut().zip(weights) {
        rest += fact * (*state as i32) * (w as i32);
        let mut out = *state as i32 + (rest >> PRECISION);
        if out < 0 {
            out = 0;
        }
        let out = out.min(255);
        rest -= (out - *state as i32) << PRECISION;
        *state = out as u8;
    }
    *rest_ms = (rest >> shift) as i16;
}

/// Redistribute `inout` frame counts toward a target duration.
///
/// - `frame_dur_exp`: 2's exponent of the frame duration in ms (2 for 4 ms).
/// - `weights`: per-state integer weights; `None` distributes uniformly.
/// - `fact_target`: fixed-point factor (`PRECISION` bits) applied to the
///   input duration to derive the target; 0 means min/max only.
/// - `rest_ms`: in/out remainder in ms, carried across calls.
///
/// Nothing changes when no factor is given and the input already lies within
/// `[min_target, max_target]`.
pub fn transform_durations(
    frame_dur_exp: u8,
    inout: &mut [u8],
    weights: Option<&[u16]>,
    min_target: i16,
    max_target: i16,
    fact_target: i16,
    rest_ms: &mut i16,
) {
    let mut input_dur: i32 = inout.iter().map(|&f| f as i32).sum();
    input_dur <<= frame_dur_exp as u32;
    if input_dur == 0 {
        return;
    }

    let mut target_dur = if fact_target != 0 {
        (fact_target as i32 * input_dur + PREC_HALF) >> PRECISION
    } else {
        input_dur
    };

    if fact_target == 0 && target_dur >= min_target as i32 && target_dur <= max_target as i32 {
        return;
    }
    if target_dur < min_target as i32 {
        target_dur = min_target as i32;
    } else if target_dur > max_target as i32 {
        target_dur = max_target as i32;
    }

    match weights {
        None => trans_dur_uniform(frame_dur_exp, inout, input_dur, target_dur, rest_ms),
        Some(w) => trans_dur_weighted(frame_dur_exp, inout, w, input_dur, target_dur, rest_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FDE: u8 = 2; // 4 ms frames

    fn total_ms(states: &[u8]) -> i32 {
        states.iter().map(|&f| f as i32).sum::<i32>() << FDE as u32
    }

    #[test]
    fn stretches_to_target_within_one_frame() {
        let weights = [1u16, 10, 10, 10, 10];
        let mut states = [2u8, 2, 2, 2, 2]; // 40 ms
        let mut rest = 0i16;
        transform_durations(FDE, &mut states, Some(&weights), 550, 650, 0, &mut rest);
        let total = total_ms(&states) + rest as i32;
        // frame quantisation may land one 4 ms frame short of the clamp
        assert!((total - 550).abs() <= 4, "total {total} states {states:?}");
    }

    #[test]
    fn untouched_when_inside_limits_without_factor() {
        let mut states = [4u8, 6, 8, 6, 4]; // 112 ms
        let mut rest = 0i16;
        transform_durations(FDE, &mut states, None, 100, 200, 0, &mut rest);
        assert_eq!(states, [4, 6, 8, 6, 4]);
        assert_eq!(rest, 0);
    }

    #[test]
    fn remainder_carries_across_repeated_calls() {
        // Target 30 ms on 4 ms frames never divides evenly; the carried rest
        // must keep the long-run total exact.
        let weights = [1u16, 4, 8, 4, 1];
        let mut rest = 0i16;
        let mut grand_total = 0i32;
        const ROUNDS: i32 = 16;
        for _ in 0..ROUNDS {
            let mut states = [3u8, 3, 3, 3, 3];
            transform_durations(FDE, &mut states, Some(&weights), 30, 30, 0, &mut rest);
            grand_total += total_ms(&states);
        }
        let drift = (grand_total + rest as i32) - ROUNDS * 30;
        assert!(drift.abs() <= 4, "drift {drift}");
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        let weights = [0u16; 5];
        let mut states = [2u8, 2, 2, 2, 2];
        let mut rest = 0i16;
        transform_durations(FDE, &mut states, Some(&weights), 80, 80, 0, &mut rest);
        assert_eq!(total_ms(&states), 80);
    }

    #[test]
    fn all_zero_input_is_left_alone() {
        let mut states = [0u8; 5];
        let mut rest = 0i16;
        transform_durations(FDE, &mut states, None, 100, 200, 0, &mut rest);
        assert_eq!(states, [0; 5]);
    }
}
