//! Small hand-rolled primitives the LEF parser needs: UTF-16LE decoding and
//! tab-delimited line splitting.

/// Decodes a UTF-16LE byte buffer (optionally BOM-prefixed) into a UTF-8
/// `String`. Falls back to UTF-8 if the buffer does not look like UTF-16LE
/// (odd length), matching `ltree`'s occasional plain-ASCII encoding in
/// older images.
pub fn decode_utf16le_or_utf8(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw.len() % 2 == 0 {
        let mut units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if units.first() == Some(&0xFEFF) {
            units.remove(0);
        }
        if let Ok(text) = String::from_utf16(&units) {
            return text;
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// Splits `line` on tabs, trimming a trailing `\0` or `\r` from each token
/// (images occasionally NUL-pad the last column).
pub fn split_tab_line(line: &str) -> Vec<&str> {
    line.split('\t')
        .map(|token| token.trim_end_matches(['\0', '\r']))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16le_with_bom() {
        let text = "entry\tsource";
        let mut bytes: Vec<u8> = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(|c| c.to_le_bytes()));
        assert_eq!(decode_utf16le_or_utf8(&bytes), text);
    }

    #[test]
    fn splits_tabs_and_trims_nul() {
        let tokens = split_tab_line("a\tb\0\tc");
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }
}
