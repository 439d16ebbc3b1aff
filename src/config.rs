//! Engine-wide tunables, pulled out as named constants rather than inlined
//! magic numbers, in the teacher's `hw/config.rs` style.

/// `bufferFrames` values the host is expected to support without coercion
/// (spec §6, "Recognised session options").
pub const RECOGNISED_BUFFER_SIZES: [u32; 4] = [64, 128, 256, 512];

pub const DEFAULT_BUFFER_FRAMES: u32 = 256;

/// Ring buffer capacity is `max(RING_CAPACITY_MULTIPLIER * bufferFrames,
/// RING_CAPACITY_FLOOR)` frames (spec §3, Input Tap state).
pub const RING_CAPACITY_MULTIPLIER: usize = 8;
pub const RING_CAPACITY_FLOOR: usize = 1024;

/// Fraction of ring capacity a newly registered reader is pre-rolled by
/// (spec §4.1 "Registration policy"; spec §9 flags this as a tunable, not a
/// constant, when porting — kept as one named constant so it is easy to
/// retune without hunting for the literal).
pub const PREROLL_FRACTION: f64 = 0.5;

/// Env var toggling verbose per-cycle profiling logs, following the
/// teacher's `MAOLAN_*_PROFILE` naming convention (`hw/config.rs`).
pub const PROFILE_ENV: &str = "PATCHBAY_PROFILE";

/// Upper bound on frames rendered per hardware callback. Lets the render
/// path use a fixed-size stack buffer instead of allocating on the output
/// hardware thread (spec §4.5 "Concurrency": the render callback must not
/// allocate).
pub const MAX_RENDER_BLOCK_FRAMES: usize = 4096;

/// Upper bound on distinct input devices feeding a single output in one
/// render pass, sized generously for a patch bay (not a mixing console).
/// Backed by a fixed-size stack array for the same reason as
/// [`MAX_RENDER_BLOCK_FRAMES`].
pub const MAX_DISTINCT_INPUTS_PER_OUTPUT: usize = 16;

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}
