//! Bob Jenkins' [`lookup3`][0] hash, as used for TACT name hashing.
//!
//! Root tables key named files by the 64-bit output of [`hashlittle2`]
//! over a normalised path. Not a cryptographic hash.
//!
//! [0]: https://www.burtleburtle.net/bob/c/lookup3.c

const SEED: u32 = 0xdead_beef;

/// One reversible mixing round over the three lanes.
fn mix(lanes: &mut [u32; 3]) {
    let [mut a, mut b, mut c] = *lanes;

    a = a.wrapping_sub(c);
    a ^= c.rotate_left(4);
    c = c.wrapping_add(b);

    b = b.wrapping_sub(a);
    b ^= a.rotate_left(6);
    a = a.wrapping_add(c);

    c = c.wrapping_sub(b);
    c ^= b.rotate_left(8);
    b = b.wrapping_add(a);

    a = a.wrapping_sub(c);
    a ^= c.rotate_left(16);
    c = c.wrapping_add(b);

    b = b.wrapping_sub(a);
    b ^= a.rotate_left(19);
    a = a.wrapping_add(c);

    c = c.wrapping_sub(b);
    c ^= b.rotate_left(4);
    b = b.wrapping_add(a);

    *lanes = [a, b, c];
}

/// Final avalanche of the three lanes.
fn finish(lanes: &mut [u32; 3]) {
    let [mut a, mut b, mut c] = *lanes;

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));

    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));

    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));

    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));

    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));

    *lanes = [a, b, c];
}

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Hash `data` into two 32-bit values, reading it as little-endian words.
///
/// `seed_c` and `seed_b` seed the two outputs; the return order is
/// (primary, secondary) matching the C version's `*pc` and `*pb`.
pub fn hashlittle2(data: &[u8], seed_c: u32, seed_b: u32) -> (u32, u32) {
    let base = SEED
        .wrapping_add(data.len() as u32)
        .wrapping_add(seed_c);
    let mut lanes = [base, base, base.wrapping_add(seed_b)];

    if data.is_empty() {
        return (lanes[2], lanes[1]);
    }

    let mut rest = data;
    while rest.len() > 12 {
        lanes[0] = lanes[0].wrapping_add(word(rest, 0));
        lanes[1] = lanes[1].wrapping_add(word(rest, 4));
        lanes[2] = lanes[2].wrapping_add(word(rest, 8));
        mix(&mut lanes);
        rest = &rest[12..];
    }

    // Final short block, zero-padded. Lanes only absorb words that held
    // at least one real byte, like the C fall-through switch.
    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    lanes[0] = lanes[0].wrapping_add(word(&tail, 0));
    if rest.len() > 4 {
        lanes[1] = lanes[1].wrapping_add(word(&tail, 4));
    }
    if rest.len() > 8 {
        lanes[2] = lanes[2].wrapping_add(word(&tail, 8));
    }
    finish(&mut lanes);

    (lanes[2], lanes[1])
}

/// 32-bit convenience form of [`hashlittle2`].
pub fn hashlittle(data: &[u8], seed: u32) -> u32 {
    hashlittle2(data, seed, 0).0
}

/// 64-bit TACT name hash.
///
/// Normalises the path the way `SStrHash` does (ASCII uppercase, `/`
/// becomes `\`), then packs the two [`hashlittle2`] words with the
/// primary hash in the high half.
pub fn hash_path(path: &str) -> u64 {
    let normalised = path.to_ascii_uppercase().replace('/', "\\");
    let (primary, secondary) = hashlittle2(normalised.as_bytes(), 0, 0);
    (u64::from(primary) << 32) | u64::from(secondary)
}
