use std::{
    fs::File,
    io::{self, Read},
    path::Path,
};

use log::debug;

/// Number of bytes inspected at the front of a downloaded file when checking
/// for a mis-served HTML error page.
pub const SNIFF_LEN: usize = 512;

const HTML_TAG: &[u8] = b"<html>";

/// Return whether the prefix of a downloaded file contains an `<html>` tag,
/// ignoring case. Misconfigured or geo-blocked mirrors sometimes serve a
/// small HTML error page with a 200 status instead of the firmware binary.
/// Only the first [`SNIFF_LEN`] bytes of the input are considered.
pub fn looks_like_html(prefix: &[u8]) -> bool {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];

    prefix
        .windows(HTML_TAG.len())
        .any(|w| w.eq_ignore_ascii_case(HTML_TAG))
}

/// Read back up to [`SNIFF_LEN`] bytes of the file at `path` and run
/// [`looks_like_html`] on them.
pub fn file_looks_like_html(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; SNIFF_LEN];
    let mut filled = 0;

    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }

        filled += n;
    }

    debug!("Sniffing first {} bytes of {:?}", filled, path);

    Ok(looks_like_html(&buf[..filled]))
}
