use crate::{
    errors::{map_error, set_last_error, ErrorCode},
    handle_registry::{register_handle, unregister_handle, with_handle, CTrie, HandleId},
    types::{AddOutcome, TrieConfig},
};
use std::slice;

// ─────────────────────────── helpers ─────────────────────────────────── //

/// Borrow a length-prefixed key from C; the first byte gives the length.
#[inline]
fn key_slice<'a>(p: *const u8) -> Result<&'a [u8], ErrorCode> {
    if p.is_null() {
        return Err(ErrorCode::InvalidKey);
    }
    let len = unsafe { *p } as usize;
    if len == 0 {
        return Err(ErrorCode::InvalidKey);
    }
    Ok(unsafe { slice::from_raw_parts(p, len) })
}

#[inline]
fn opt_key_slice<'a>(p: *const u8) -> Result<Option<&'a [u8]>, ErrorCode> {
    if p.is_null() {
        Ok(None)
    } else {
        key_slice(p).map(Some)
    }
}

#[inline]
fn finish(code: ErrorCode) -> ErrorCode {
    set_last_error(code);
    code
}

// ─── small helper to turn Result<T,ErrorCode> into early-return ──────────
macro_rules! try_c { ($expr:expr) => { match $expr {
    Ok(v)  => v,
    Err(e) => return finish(e),
}}}

// ───────────────────────── lifetime ──────────────────────────────────── //

/// Create a trie for keys of at most `max_keylen` bytes whose significant
/// bits start at `key_offset_bits`. `node_capacity == 0` means unbounded.
/// Stores the handle in `*out`.
#[no_mangle]
pub extern "C" fn radij_open(
    max_keylen: usize,
    key_offset_bits: u16,
    node_capacity: usize,
    out: *mut HandleId,
) -> ErrorCode {
    if out.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let mut config = TrieConfig::default()
        .with_max_keylen(max_keylen)
        .with_key_offset_bits(key_offset_bits);
    if node_capacity > 0 {
        config = config.with_node_capacity(node_capacity);
    }
    let trie = try_c!(CTrie::new(config).map_err(|e| map_error(&e)));
    unsafe { *out = register_handle(trie) };
    finish(ErrorCode::Success)
}

#[no_mangle]
pub extern "C" fn radij_close(h: HandleId) -> ErrorCode {
    finish(match unregister_handle(h) {
        Ok(()) => ErrorCode::Success,
        Err(code) => code,
    })
}

// ───────────────────────── CRUD ──────────────────────────────────────── //

/// `mask` may be NULL for a host entry. Returns `MaskNotEntered` when the
/// route went in without its mask registration.
#[no_mangle]
pub extern "C" fn radij_add_route(h: HandleId, key: *const u8, mask: *const u8, value: u64) -> ErrorCode {
    let key = try_c!(key_slice(key));
    let mask = try_c!(opt_key_slice(mask));
    let res = try_c!(with_handle(h, |t| t.add_route(key, mask, value)));
    finish(match res {
        Ok(AddOutcome::Added(_)) => ErrorCode::Success,
        Ok(AddOutcome::MaskNotEntered(_)) => ErrorCode::MaskNotEntered,
        Err(e) => map_error(&e),
    })
}

/// Removes the route; its value is written to `out_value` unless NULL.
#[no_mangle]
pub extern "C" fn radij_delete(h: HandleId, key: *const u8, mask: *const u8, out_value: *mut u64) -> ErrorCode {
    let key = try_c!(key_slice(key));
    let mask = try_c!(opt_key_slice(mask));
    let removed = try_c!(with_handle(h, |t| t.delete(key, mask)));
    finish(match removed {
        Ok(r) => {
            if !out_value.is_null() {
                unsafe { *out_value = r.value };
            }
            ErrorCode::Success
        }
        Err(e) => map_error(&e),
    })
}

/// Longest match for `key`; `NotFound` when nothing covers it.
#[no_mangle]
pub extern "C" fn radij_match(h: HandleId, key: *const u8, out_value: *mut u64) -> ErrorCode {
    if out_value.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let key = try_c!(key_slice(key));
    let found = try_c!(with_handle(h, |t| t.longest_match(key)));
    finish(match found {
        Ok(Some(v)) => {
            unsafe { *out_value = v };
            ErrorCode::Success
        }
        Ok(None) => ErrorCode::NotFound,
        Err(e) => map_error(&e),
    })
}

// ───────────────────── size & maintenance ────────────────────────────── //

#[no_mangle]
pub extern "C" fn radij_len(h: HandleId, out: *mut u64) -> ErrorCode {
    if out.is_null() {
        return finish(ErrorCode::InvalidHandle);
    }
    let len = try_c!(with_handle(h, |t| t.len()));
    finish(match len {
        Ok(n) => {
            unsafe { *out = n as u64 };
            ErrorCode::Success
        }
        Err(e) => map_error(&e),
    })
}

/// Delete every route; the count goes to `out_removed` unless NULL.
#[no_mangle]
pub extern "C" fn radij_clear(h: HandleId, out_removed: *mut u64) -> ErrorCode {
    let cleared = try_c!(with_handle(h, |t| t.clear()));
    finish(match cleared {
        Ok(n) => {
            if !out_removed.is_null() {
                unsafe { *out_removed = n as u64 };
            }
            ErrorCode::Success
        }
        Err(e) => map_error(&e),
    })
}
