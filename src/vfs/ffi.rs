//! Registration glue between [`ZstdVfs`] and the SQLite C VFS contract.
//!
//! SQLite hands every callback a raw `sqlite3_vfs` or `sqlite3_file`
//! pointer; this module owns the layout tricks (the `ZstdFile` rides in
//! the tail of the engine-allocated file object) and the mapping from the
//! crate's error taxonomy to SQLite result codes. Everything behavioral
//! lives in the safe layer.

use std::ffi::CStr;
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libsqlite3_sys as ffi;

use super::{ZstdFile, ZstdVfs, VFS_NAME};
use crate::config::VfsOptions;
use crate::error::{Error, Result};

/// Register the `"zstd"` VFS with default options.
///
/// Idempotent: the first call performs the registration and every later
/// call (with any options) returns the cached outcome. The VFS is never
/// made the process default.
pub fn register() -> Result<()> {
    register_with(VfsOptions::default())
}

/// Register the `"zstd"` VFS with custom options.
pub fn register_with(options: VfsOptions) -> Result<()> {
    static REGISTRATION: OnceLock<Result<()>> = OnceLock::new();
    REGISTRATION.get_or_init(|| register_vfs(options)).clone()
}

fn register_vfs(options: VfsOptions) -> Result<()> {
    const VFS_NAME_C: &[u8] = b"zstd\0";

    let app_data = Box::into_raw(Box::new(ZstdVfs::new(options)));
    let vfs = Box::into_raw(Box::new(ffi::sqlite3_vfs {
        iVersion: 2,
        szOsFile: mem::size_of::<VfsFile>() as c_int,
        mxPathname: 1024,
        pNext: ptr::null_mut(),
        zName: VFS_NAME_C.as_ptr() as *const c_char,
        pAppData: app_data as *mut c_void,
        xOpen: Some(x_open),
        xDelete: Some(x_delete),
        xAccess: Some(x_access),
        xFullPathname: Some(x_full_pathname),
        xDlOpen: None,
        xDlError: None,
        xDlSym: None,
        xDlClose: None,
        xRandomness: Some(x_randomness),
        xSleep: Some(x_sleep),
        xCurrentTime: Some(x_current_time),
        xGetLastError: Some(x_get_last_error),
        xCurrentTimeInt64: Some(x_current_time_int64),
        xSetSystemCall: None,
        xGetSystemCall: None,
        xNextSystemCall: None,
    }));

    let rc = unsafe { ffi::sqlite3_vfs_register(vfs, 0) };
    if rc != ffi::SQLITE_OK {
        unsafe {
            drop(Box::from_raw(vfs));
            drop(Box::from_raw(app_data));
        }
        return Err(Error::Io(format!(
            "sqlite3_vfs_register(\"{VFS_NAME}\") failed with code {rc}"
        )));
    }
    Ok(())
}

/// The engine allocates `szOsFile` bytes per open file and hands them to
/// `xOpen`; the `base` member must come first so the pointer doubles as a
/// `sqlite3_file`.
#[repr(C)]
struct VfsFile {
    base: ffi::sqlite3_file,
    file: *mut ZstdFile,
}

static IO_METHODS: ffi::sqlite3_io_methods = ffi::sqlite3_io_methods {
    iVersion: 1,
    xClose: Some(x_close),
    xRead: Some(x_read),
    xWrite: Some(x_write),
    xTruncate: Some(x_truncate),
    xSync: Some(x_sync),
    xFileSize: Some(x_file_size),
    xLock: Some(x_lock),
    xUnlock: Some(x_unlock),
    xCheckReservedLock: Some(x_check_reserved_lock),
    xFileControl: Some(x_file_control),
    xSectorSize: Some(x_sector_size),
    xDeviceCharacteristics: Some(x_device_characteristics),
    xShmMap: None,
    xShmLock: None,
    xShmBarrier: None,
    xShmUnmap: None,
    xFetch: None,
    xUnfetch: None,
};

/// Map an error to the engine's nearest result code.
fn error_code(err: &Error) -> c_int {
    match err {
        Error::ReadOnly => ffi::SQLITE_READONLY,
        Error::Corrupt(_) => ffi::SQLITE_CORRUPT,
        Error::IoShort { .. } => ffi::SQLITE_IOERR_SHORT_READ,
        Error::Cancelled => ffi::SQLITE_INTERRUPT,
        Error::CantOpen(_) | Error::NotFound(_) | Error::PermissionDenied(_) => {
            ffi::SQLITE_CANTOPEN
        }
        Error::Transient(_) | Error::Io(_) => ffi::SQLITE_IOERR_READ,
    }
}

/// `xOpen` has a narrower contract: anything that is not corruption reads
/// as "could not open".
fn open_error_code(err: &Error) -> c_int {
    match err {
        Error::Corrupt(_) => ffi::SQLITE_CORRUPT,
        _ => ffi::SQLITE_CANTOPEN,
    }
}

unsafe fn vfs_ref<'a>(p_vfs: *mut ffi::sqlite3_vfs) -> &'a ZstdVfs {
    &*((*p_vfs).pAppData as *const ZstdVfs)
}

unsafe fn file_ref<'a>(p_file: *mut ffi::sqlite3_file) -> &'a ZstdFile {
    let ext = p_file as *mut VfsFile;
    &*(*ext).file
}

unsafe extern "C" fn x_open(
    p_vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    p_file: *mut ffi::sqlite3_file,
    _flags: c_int,
    p_out_flags: *mut c_int,
) -> c_int {
    let ext = p_file as *mut VfsFile;
    // A null pMethods tells the engine to skip xClose on a failed open.
    (*ext).base.pMethods = ptr::null();
    (*ext).file = ptr::null_mut();

    // Anonymous temp files have no place in a read-only VFS.
    if z_name.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_CANTOPEN,
    };

    match vfs_ref(p_vfs).open(name) {
        Ok(file) => {
            (*ext).file = Box::into_raw(Box::new(file));
            (*ext).base.pMethods = &IO_METHODS;
            if !p_out_flags.is_null() {
                // Whatever was requested, the file comes back read-only.
                *p_out_flags = ffi::SQLITE_OPEN_READONLY;
            }
            ffi::SQLITE_OK
        }
        Err(err) => open_error_code(&err),
    }
}

unsafe extern "C" fn x_delete(
    p_vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _sync_dir: c_int,
) -> c_int {
    let name = if z_name.is_null() {
        ""
    } else {
        match CStr::from_ptr(z_name).to_str() {
            Ok(name) => name,
            Err(_) => "",
        }
    };
    match vfs_ref(p_vfs).delete(name) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_access(
    p_vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    _flags: c_int,
    p_res_out: *mut c_int,
) -> c_int {
    let found = if z_name.is_null() {
        false
    } else {
        match CStr::from_ptr(z_name).to_str() {
            Ok(name) => vfs_ref(p_vfs).access(name),
            Err(_) => false,
        }
    };
    if !p_res_out.is_null() {
        *p_res_out = found as c_int;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_full_pathname(
    p_vfs: *mut ffi::sqlite3_vfs,
    z_name: *const c_char,
    n_out: c_int,
    z_out: *mut c_char,
) -> c_int {
    if z_name.is_null() || z_out.is_null() {
        return ffi::SQLITE_CANTOPEN;
    }
    let name = match CStr::from_ptr(z_name).to_str() {
        Ok(name) => name,
        Err(_) => return ffi::SQLITE_CANTOPEN,
    };
    let resolved = vfs_ref(p_vfs).full_pathname(name).as_bytes();
    if resolved.len() + 1 > n_out as usize {
        return ffi::SQLITE_CANTOPEN;
    }
    ptr::copy_nonoverlapping(resolved.as_ptr() as *const c_char, z_out, resolved.len());
    *z_out.add(resolved.len()) = 0;
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_randomness(
    _p_vfs: *mut ffi::sqlite3_vfs,
    n_byte: c_int,
    z_out: *mut c_char,
) -> c_int {
    // Only seeds the engine's internal PRNG; a clock-seeded xorshift is
    // plenty for temp-name entropy in a VFS that cannot create files.
    let mut state = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
        | 1;
    let out = slice::from_raw_parts_mut(z_out as *mut u8, n_byte.max(0) as usize);
    for byte in out.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = state as u8;
    }
    out.len() as c_int
}

unsafe extern "C" fn x_sleep(_p_vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    thread::sleep(Duration::from_micros(microseconds.max(0) as u64));
    microseconds
}

/// Milliseconds between the julian-day epoch and the unix epoch.
const JULIAN_UNIX_EPOCH_MS: i64 = 210_866_760_000_000;

unsafe extern "C" fn x_current_time_int64(
    _p_vfs: *mut ffi::sqlite3_vfs,
    p_out: *mut ffi::sqlite3_int64,
) -> c_int {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    if !p_out.is_null() {
        *p_out = JULIAN_UNIX_EPOCH_MS + unix_ms;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_current_time(p_vfs: *mut ffi::sqlite3_vfs, p_out: *mut f64) -> c_int {
    let mut ms: ffi::sqlite3_int64 = 0;
    let rc = x_current_time_int64(p_vfs, &mut ms);
    if !p_out.is_null() {
        *p_out = ms as f64 / 86_400_000.0;
    }
    rc
}

unsafe extern "C" fn x_get_last_error(
    _p_vfs: *mut ffi::sqlite3_vfs,
    _n_byte: c_int,
    _z_out: *mut c_char,
) -> c_int {
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_close(p_file: *mut ffi::sqlite3_file) -> c_int {
    let ext = p_file as *mut VfsFile;
    if !(*ext).file.is_null() {
        drop(Box::from_raw((*ext).file));
        (*ext).file = ptr::null_mut();
    }
    (*ext).base.pMethods = ptr::null();
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_read(
    p_file: *mut ffi::sqlite3_file,
    p_buf: *mut c_void,
    i_amt: c_int,
    i_ofst: ffi::sqlite3_int64,
) -> c_int {
    if i_amt < 0 || i_ofst < 0 {
        return ffi::SQLITE_IOERR_READ;
    }
    let buf = slice::from_raw_parts_mut(p_buf as *mut u8, i_amt as usize);
    match file_ref(p_file).read_at(i_ofst as u64, buf) {
        Ok(n) if n == buf.len() => ffi::SQLITE_OK,
        Ok(n) => {
            // Short-read convention: zero-fill the tail and say so.
            buf[n..].fill(0);
            ffi::SQLITE_IOERR_SHORT_READ
        }
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_write(
    p_file: *mut ffi::sqlite3_file,
    p_buf: *const c_void,
    i_amt: c_int,
    i_ofst: ffi::sqlite3_int64,
) -> c_int {
    let buf = slice::from_raw_parts(p_buf as *const u8, i_amt.max(0) as usize);
    match file_ref(p_file).write(i_ofst.max(0) as u64, buf) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_truncate(
    p_file: *mut ffi::sqlite3_file,
    size: ffi::sqlite3_int64,
) -> c_int {
    match file_ref(p_file).truncate(size.max(0) as u64) {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_sync(p_file: *mut ffi::sqlite3_file, _flags: c_int) -> c_int {
    match file_ref(p_file).sync() {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_file_size(
    p_file: *mut ffi::sqlite3_file,
    p_size: *mut ffi::sqlite3_int64,
) -> c_int {
    if !p_size.is_null() {
        *p_size = file_ref(p_file).file_size() as ffi::sqlite3_int64;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_lock(p_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    match file_ref(p_file).lock() {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_unlock(p_file: *mut ffi::sqlite3_file, _level: c_int) -> c_int {
    match file_ref(p_file).unlock() {
        Ok(()) => ffi::SQLITE_OK,
        Err(err) => error_code(&err),
    }
}

unsafe extern "C" fn x_check_reserved_lock(
    p_file: *mut ffi::sqlite3_file,
    p_res_out: *mut c_int,
) -> c_int {
    if !p_res_out.is_null() {
        *p_res_out = file_ref(p_file).check_reserved_lock() as c_int;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn x_file_control(
    _p_file: *mut ffi::sqlite3_file,
    _op: c_int,
    _p_arg: *mut c_void,
) -> c_int {
    ffi::SQLITE_NOTFOUND
}

unsafe extern "C" fn x_sector_size(p_file: *mut ffi::sqlite3_file) -> c_int {
    file_ref(p_file).sector_size()
}

unsafe extern "C" fn x_device_characteristics(p_file: *mut ffi::sqlite3_file) -> c_int {
    file_ref(p_file).device_characteristics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_engine_codes() {
        assert_eq!(error_code(&Error::ReadOnly), ffi::SQLITE_READONLY);
        assert_eq!(
            error_code(&Error::Corrupt("x".into())),
            ffi::SQLITE_CORRUPT
        );
        assert_eq!(
            error_code(&Error::IoShort { wanted: 4, got: 0 }),
            ffi::SQLITE_IOERR_SHORT_READ
        );
        assert_eq!(error_code(&Error::Cancelled), ffi::SQLITE_INTERRUPT);
        assert_eq!(
            error_code(&Error::NotFound("x".into())),
            ffi::SQLITE_CANTOPEN
        );
        assert_eq!(
            error_code(&Error::Transient("x".into())),
            ffi::SQLITE_IOERR_READ
        );
    }

    #[test]
    fn open_errors_collapse_to_cantopen_except_corruption() {
        assert_eq!(
            open_error_code(&Error::NotFound("x".into())),
            ffi::SQLITE_CANTOPEN
        );
        assert_eq!(open_error_code(&Error::ReadOnly), ffi::SQLITE_CANTOPEN);
        assert_eq!(
            open_error_code(&Error::Corrupt("x".into())),
            ffi::SQLITE_CORRUPT
        );
    }

    #[test]
    fn registration_is_idempotent() {
        assert_eq!(register(), Ok(()));
        assert_eq!(register(), Ok(()));
        assert_eq!(register_with(VfsOptions::default()), Ok(()));
    }
}
