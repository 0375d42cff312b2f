#![no_main]

use avif_probe::{probe, probe_reader, Error, Features};
use libfuzzer_sys::fuzz_target;
use std::mem::{discriminant, Discriminant};

/// What a caller can observe from one probe of one prefix.
#[derive(PartialEq, Debug, Clone, Copy)]
enum Outcome {
    Decided(Option<Features>, Option<Discriminant<Error>>),
    NeedMore,
}

fn outcome(result: avif_probe::Result<Features>) -> Outcome {
    match result {
        Ok(features) => {
            // Success must populate every field.
            assert!(features.width > 0 && features.height > 0);
            assert!(features.bit_depth > 0 && features.num_channels > 0);
            Outcome::Decided(Some(features), None)
        }
        Err(Error::NotEnoughData) => Outcome::NeedMore,
        Err(err) => Outcome::Decided(None, Some(discriminant(&err))),
    }
}

// For any data and any sizes s1 <= s2, a decision reached at s1 must be
// repeated at s2, byte-identical features included. The streaming variant
// must agree with the buffer variant on the full input.
fuzz_target!(|data: &[u8]| {
    let mut settled: Option<Outcome> = None;
    let mut size = 0;
    while size <= data.len() {
        let now = outcome(probe(&data[..size]));
        if let Some(settled) = settled {
            assert_eq!(settled, now, "decision changed at {size} bytes");
        } else if now != Outcome::NeedMore {
            settled = Some(now);
        }
        // Sparser steps once it is highly likely the header region ended.
        size += if size > 4096 { 511 } else { 1 };
    }

    let full = outcome(probe(data));
    let streamed = outcome(probe_reader(&mut std::io::Cursor::new(data)));
    // The reader variant knows the exact file size, so it may settle an
    // undecidable prefix either way, but an agreed decision must match.
    if full != Outcome::NeedMore && streamed != Outcome::NeedMore {
        if let (Outcome::Decided(a, _), Outcome::Decided(b, _)) = (full, streamed) {
            if a.is_some() && b.is_some() {
                assert_eq!(a, b);
            }
        }
    }
});
