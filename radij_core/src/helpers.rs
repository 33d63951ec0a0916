//! Helper functions for radix tree operations

use crate::errors::Error;
use ipnet::IpNet;

// Packs a slot and generation into a single u64 for ABA-safe handles.
#[inline]
pub fn pack(slot: u32, gen: u32) -> u64 {
    ((gen as u64) << 32) | (slot as u64)
}

#[inline]
pub fn unpack(ptr: u64) -> (u32, u32) {
    (ptr as u32, (ptr >> 32) as u32)
}

/// Byte `off` of a key; keys are zero-padded past their slice.
#[inline(always)]
pub fn byte_at(key: &[u8], off: usize) -> u8 {
    key.get(off).copied().unwrap_or(0)
}

/// Declared length of a length-prefixed key.
#[inline(always)]
pub fn key_len(key: &[u8]) -> usize {
    byte_at(key, 0) as usize
}

/// Byte offset and in-byte mask for bit index `b`.
#[inline]
pub fn bit_position(b: i16) -> (usize, u8) {
    debug_assert!(b >= 0);
    ((b >> 3) as usize, 0x80u8 >> (b & 7))
}

pub fn validate_key(key: &[u8], max_keylen: usize, what: &str) -> Result<(), Error> {
    let declared = key_len(key);
    if declared == 0 {
        return Err(Error::InvalidKey(format!("{what} has a zero length byte")));
    }
    if declared != key.len() {
        return Err(Error::InvalidKey(format!(
            "{what} declares {declared} bytes but {} were supplied",
            key.len()
        )));
    }
    if declared > max_keylen {
        return Err(Error::InvalidKey(format!(
            "{what} is {declared} bytes, limit is {max_keylen}"
        )));
    }
    Ok(())
}

/// Index of the first byte in `from..to` where `a` and `b` differ.
pub fn first_difference(a: &[u8], b: &[u8], from: usize, to: usize) -> Option<usize> {
    (from..to).find(|&i| byte_at(a, i) != byte_at(b, i))
}

#[inline]
pub fn same_bytes(a: &[u8], b: &[u8], from: usize, to: usize) -> bool {
    first_difference(a, b, from, to).is_none()
}

/// True iff `candidate` is a strictly more specific netmask than `existing`.
///
/// The comparison runs over the overlapping region; when `existing` is the
/// longer one its surplus bytes must be zero, and when the masks agree over
/// the overlap a longer `candidate` refines only if its tail has a set bit.
pub fn refines(candidate: &[u8], existing: &[u8]) -> Result<bool, Error> {
    for (what, mask) in [("candidate mask", candidate), ("existing mask", existing)] {
        let declared = key_len(mask);
        if declared == 0 || declared > mask.len() {
            return Err(Error::InvariantViolation(format!(
                "{what} declares {declared} bytes over a {}-byte buffer",
                mask.len()
            )));
        }
    }
    Ok(refines_raw(candidate, existing))
}

pub(crate) fn refines_raw(m: &[u8], n: &[u8]) -> bool {
    let mlen = key_len(m);
    let nlen = key_len(n);
    let longer = nlen as isize - mlen as isize;
    let lim = if longer > 0 { mlen } else { nlen };
    let mut masks_are_equal = true;

    let mut i = 1;
    while i < lim {
        let (nb, mb) = (byte_at(n, i), byte_at(m, i));
        if nb & !mb != 0 {
            return false;
        }
        if nb != mb {
            masks_are_equal = false;
        }
        i += 1;
    }
    // m stopped where the shared loop stopped
    let m_resume = i;
    while i < nlen {
        if byte_at(n, i) != 0 {
            return false;
        }
        i += 1;
    }
    if masks_are_equal && longer < 0 && (m_resume..mlen).any(|j| byte_at(m, j) != 0) {
        return true;
    }
    !masks_are_equal
}

/// Bit index of the first zero bit of `mask` at or after byte `skip`.
pub fn mask_index(mask: &[u8], skip: usize) -> i32 {
    let mlen = key_len(mask);
    let mut cp = skip;
    while cp < mlen && byte_at(mask, cp) == 0xff {
        cp += 1;
    }
    let mut b = (cp << 3) as i32;
    if cp != mlen {
        let byte = byte_at(mask, cp);
        if byte != 0 {
            let mut j = 0x80u8;
            while j != 0 && byte & j != 0 {
                b += 1;
                j >>= 1;
            }
        }
    }
    b
}

/// A mask has a non-contiguous byte if some byte is neither 0x00 nor 0xff.
pub fn is_odd_mask(mask: &[u8], skip: usize) -> bool {
    (skip..key_len(mask)).any(|i| !matches!(byte_at(mask, i), 0x00 | 0xff))
}

/// Length-prefixed mask of `total_len` bytes with the first `prefix_bits`
/// bits (counted after the length byte) set.
pub fn prefix_mask(total_len: u8, prefix_bits: u32) -> Vec<u8> {
    let mut out = vec![0u8; total_len as usize];
    if out.is_empty() {
        return out;
    }
    out[0] = total_len;
    let mut left = prefix_bits;
    for byte in out.iter_mut().skip(1) {
        if left == 0 {
            break;
        }
        let take = left.min(8);
        *byte = !(0xffu8.checked_shr(take).unwrap_or(0));
        left -= take;
    }
    out
}

/// Length-prefixed key and mask for a network, e.g. `10.0.0.0/8` becomes
/// `[5,10,0,0,0]` / `[5,255,0,0,0]`.
pub fn net_key(net: &IpNet) -> (Vec<u8>, Vec<u8>) {
    let octets: Vec<u8> = match net.network() {
        std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
        std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
    };
    let total = (octets.len() + 1) as u8;
    let mut key = Vec::with_capacity(octets.len() + 1);
    key.push(total);
    key.extend_from_slice(&octets);
    (key, prefix_mask(total, net.prefix_len() as u32))
}

/// Hex rendering used by the tree dump.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
