use super::*;

/// Builds one 9-byte-header + payload frame as spec §3.2 describes it.
fn frame(command: u8, client: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(command);
    buf.extend_from_slice(&0u16.to_le_bytes()); // protocol version
    buf.extend_from_slice(&client.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn feed(buffer: &mut MessageBuffer, bytes: &[u8]) {
    let mut written = 0;
    while written < bytes.len() {
        if buffer.tail_capacity() == 0 {
            buffer.shift_front();
        }
        let n = std::cmp::min(buffer.tail_capacity().max(1), bytes.len() - written);
        let n = n.min(bytes.len() - written);
        buffer.tail_mut()[..n].copy_from_slice(&bytes[written..written + n]);
        buffer.bump_end(n).unwrap();
        written += n;
    }
}

#[test]
fn three_back_to_back_messages_parse_in_order() {
    let mut buffer = MessageBuffer::new(1024, 4);

    let a = frame(0x10, 1, &[0u8; 23]);
    let b = frame(0x10, 1, &[0u8; 31]);
    let c = frame(0x10, 1, &[0u8; 39]);

    let mut all = Vec::new();
    all.extend_from_slice(&a);
    all.extend_from_slice(&b);
    all.extend_from_slice(&c);
    feed(&mut buffer, &all);

    assert_eq!(buffer.next_message().unwrap().unwrap().to_vec(), a);
    assert_eq!(buffer.next_message().unwrap().unwrap().to_vec(), b);
    assert_eq!(buffer.next_message().unwrap().unwrap().to_vec(), c);
    assert!(buffer.next_message().unwrap().is_none());

    assert!(buffer.start <= buffer.end);
    assert!(buffer.end <= buffer.mem.len());
}

#[test]
fn oversize_message_is_rejected() {
    let mut buffer = MessageBuffer::new(256, 4);

    let mut header = Vec::new();
    header.push(0x18);
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&7u16.to_le_bytes());
    header.extend_from_slice(&512u32.to_le_bytes());
    feed(&mut buffer, &header);

    let err = buffer.next_message().unwrap_err();
    assert_eq!(
        err,
        BufferError::MessageTooLarge {
            declared: 512,
            max: 256
        }
    );
}

#[test]
fn partial_message_returns_none_without_error() {
    let mut buffer = MessageBuffer::new(1024, 4);
    let full = frame(0x12, 9, &[7u8; 40]);
    feed(&mut buffer, &full[..full.len() - 5]);
    assert!(buffer.next_message().unwrap().is_none());

    feed(&mut buffer, &full[full.len() - 5..]);
    assert_eq!(buffer.next_message().unwrap().unwrap().to_vec(), full);
}

#[test]
fn concatenation_round_trips_across_arbitrary_chunking() {
    let messages: Vec<Vec<u8>> = (0..6)
        .map(|i| frame(0x18, i as u16, &vec![i as u8; 3 + i * 5]))
        .collect();
    let mut all = Vec::new();
    for m in &messages {
        all.extend_from_slice(m);
    }

    // Feed byte by byte: the single-byte-at-a-time case from spec §8.2.
    let mut buffer = MessageBuffer::new(4096, 4);
    let mut parsed = Vec::new();
    for byte in &all {
        feed(&mut buffer, std::slice::from_ref(byte));
        while let Some(msg) = buffer.next_message().unwrap() {
            parsed.push(msg.to_vec());
        }
    }

    assert_eq!(parsed, messages);
}

#[test]
fn buffer_shrinks_after_shrink_threshold_small_messages() {
    let mut buffer = MessageBuffer::new(4096, 3);

    // Force growth past INITIAL_SIZE with one big message first.
    let big = frame(0x18, 1, &vec![0u8; INITIAL_SIZE * 3]);
    feed(&mut buffer, &big);
    assert!(buffer.next_message().unwrap().is_some());
    assert!(buffer.mem.len() > INITIAL_SIZE);

    // Now drain three consecutive small messages (<= capacity/2) with the
    // buffer emptied between each, as spec §8.1's shrink invariant requires.
    for _ in 0..3 {
        let small = frame(0x18, 1, &[0u8; 4]);
        feed(&mut buffer, &small);
        assert!(buffer.next_message().unwrap().is_some());
    }

    assert_eq!(buffer.mem.len(), INITIAL_SIZE);
}

#[test]
fn bump_end_rejects_overflow() {
    let mut buffer = MessageBuffer::new(1024, 4);
    let cap = buffer.tail_capacity();
    assert_eq!(buffer.bump_end(cap + 1), Err(BufferError::Overflow));
}
