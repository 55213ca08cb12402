use std::io::Read;
use std::thread::{self, JoinHandle};

use crate::buffer::SharedBuffer;

const CHUNK: usize = 4096;

/// Copy a child's output stream into `sink` chunk by chunk. Lines split
/// across reads are stitched together; the last line is closed at EOF.
pub(crate) fn spawn_pump<R>(
    mut reader: R,
    sink: SharedBuffer,
    target: i32,
    partial: i32,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut chunk = [0u8; CHUNK];
        let mut carry: Vec<u8> = Vec::new();
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            carry.extend_from_slice(&chunk[..read]);
            let text = take_decodable(&mut carry);
            if !text.is_empty() {
                sink.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .merge_line(target, partial, &text);
            }
        }
        let mut buffer = sink.lock().unwrap_or_else(|e| e.into_inner());
        if !carry.is_empty() {
            buffer.merge_line(target, partial, &String::from_utf8_lossy(&carry));
        }
        buffer.close_partial(target, partial);
    })
}

/// Decode the longest valid prefix of `bytes`, keeping an incomplete
/// trailing UTF-8 sequence for the next read.
fn take_decodable(bytes: &mut Vec<u8>) -> String {
    let (valid, malformed) = match std::str::from_utf8(bytes) {
        Ok(text) => (text.len(), false),
        Err(e) => (e.valid_up_to(), e.error_len().is_some()),
    };
    if malformed {
        let text = String::from_utf8_lossy(bytes).into_owned();
        bytes.clear();
        return text;
    }
    let rest = bytes.split_off(valid);
    let text = String::from_utf8_lossy(bytes).into_owned();
    *bytes = rest;
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{LineBuffer, priority};
    use std::io::Cursor;

    #[test]
    fn test_take_decodable_keeps_split_char() {
        let mut bytes = "ab\u{e9}".as_bytes().to_vec();
        bytes.pop();
        assert_eq!(take_decodable(&mut bytes), "ab");
        assert_eq!(bytes.len(), 1);
        bytes.push(0xa9);
        assert_eq!(take_decodable(&mut bytes), "\u{e9}");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_pump_closes_partial_line() {
        let sink = LineBuffer::shared(priority::INFO);
        let input = Cursor::new(b"one\ntwo".to_vec());
        spawn_pump(input, sink.clone(), priority::STDOUT, priority::STDOUT_PARTIAL)
            .join()
            .unwrap();
        let buffer = sink.lock().unwrap();
        assert_eq!(
            buffer.to_string_array(priority::STDOUT, priority::STDOUT),
            vec!["one", "two"]
        );
        assert_eq!(buffer.max_priority(), priority::STDOUT);
    }
}
