#![no_main]
use ermalloc_core::{Policy, PolicyChain};
use libfuzzer_sys::fuzz_target;

fn policy(byte: u8) -> Policy {
    match byte % 5 {
        0 => Policy::Nil,
        1 => Policy::tmr(),
        2 => Policy::reed_solomon(2 + u32::from(byte % 15)).unwrap_or(Policy::Nil),
        _ => Policy::redundancy(2 + u32::from(byte % 14)).unwrap_or(Policy::Nil),
    }
}

fuzz_target!(|data: &[u8]| {
    // Layout: [n_policies, p0, p1, p2, flip_offset_lo, flip_offset_hi, mask, payload...]
    if data.len() < 7 {
        return;
    }
    let count = usize::from(data[0] % 4);
    let policies: Vec<Policy> = data[1..4].iter().take(count).map(|&b| policy(b)).collect();
    let Ok(chain) = PolicyChain::new(&policies) else {
        return;
    };
    let payload = &data[7..];
    let Ok(mut physical) = chain.encode_to_vec(payload) else {
        return;
    };

    // A freshly encoded buffer is always consistent.
    assert!(!chain.is_corrupted(&physical));

    if !physical.is_empty() && data[6] != 0 {
        let offset = usize::from(u16::from_le_bytes([data[4], data[5]])) % physical.len();
        physical[offset] ^= data[6];
    }

    // Must never panic; after a recoverable repair the buffer is consistent.
    let report = chain.verify_and_correct(&mut physical);
    if report.is_recoverable() {
        assert!(!chain.is_corrupted(&physical));
    }
    let _ = report.status();
    let (logical, _) = chain.decode(&physical);
    assert_eq!(logical.len(), payload.len());
});
