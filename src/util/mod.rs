mod cache;

pub use cache::LruCache;

pub fn decode_fixed_uint16(key: &[u8]) -> u16 {
    unsafe { u16::from_le_bytes(*(key as *const _ as *const [u8; 2])) }
}

pub fn decode_fixed_uint32(key: &[u8]) -> u32 {
    unsafe { u32::from_le_bytes(*(key as *const _ as *const [u8; 4])) }
}

pub fn decode_fixed_uint64(key: &[u8]) -> u64 {
    unsafe { u64::from_le_bytes(*(key as *const _ as *const [u8; 8])) }
}

pub fn extract_user_key(key: &[u8]) -> &[u8] {
    let l = key.len();
    &key[..(l - 8)]
}

pub fn put_var_uint32(buf: &mut Vec<u8>, mut n: u32) {
    const B: u32 = 128;
    while n >= B {
        buf.push(((n & (B - 1)) | B) as u8);
        n >>= 7;
    }
    buf.push(n as u8);
}

pub fn put_var_uint64(buf: &mut Vec<u8>, mut v: u64) {
    const B: u64 = 128;
    while v >= B {
        buf.push(((v & (B - 1)) | B) as u8);
        v >>= 7;
    }
    buf.push(v as u8);
}

pub fn put_varint32varint32(buf: &mut Vec<u8>, a: u32, b: u32) {
    put_var_uint32(buf, a);
    put_var_uint32(buf, b);
}

pub fn put_varint32varint64(buf: &mut Vec<u8>, a: u32, b: u64) {
    put_var_uint32(buf, a);
    put_var_uint64(buf, b);
}

pub fn put_varint64varint64(buf: &mut Vec<u8>, a: u64, b: u64) {
    put_var_uint64(buf, a);
    put_var_uint64(buf, b);
}

pub fn put_varint32varint32varint64(buf: &mut Vec<u8>, a: u32, b: u32, c: u64) {
    put_var_uint32(buf, a);
    put_var_uint32(buf, b);
    put_var_uint64(buf, c);
}

pub fn put_length_prefixed_slice(buf: &mut Vec<u8>, data: &[u8]) {
    put_var_uint32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

pub fn get_var_uint32(data: &[u8], offset: &mut usize) -> Option<u32> {
    const B: u8 = 128;
    const MASK: u32 = 127;
    let mut ret: u32 = 0;
    for i in 0..5 {
        if i >= data.len() {
            return None;
        }
        if (data[i] & B) > 0 {
            ret |= (data[i] as u32 & MASK) << (i as u32 * 7);
        } else {
            ret |= (data[i] as u32) << (i as u32 * 7);
            *offset += i + 1;
            return Some(ret);
        }
    }
    None
}

pub fn get_var_uint64(data: &[u8], offset: &mut usize) -> Option<u64> {
    const B: u8 = 128;
    const MASK: u64 = 127;
    let mut ret: u64 = 0;
    let mut shift = 0;
    let mut idx = 0;
    while shift <= 63 && idx < data.len() {
        if data[idx] & B > 0 {
            ret |= (data[idx] as u64 & MASK) << shift;
        } else {
            ret |= (data[idx] as u64) << shift;
            *offset += idx + 1;
            return Some(ret);
        }
        shift += 7;
        idx += 1;
    }
    None
}

pub fn get_length_prefixed_slice<'a>(data: &'a [u8], offset: &mut usize) -> Option<&'a [u8]> {
    let mut l = 0;
    let len = get_var_uint32(data, &mut l)? as usize;
    if l + len > data.len() {
        return None;
    }
    *offset += l + len;
    Some(&data[l..(l + len)])
}

pub fn difference_offset(origin: &[u8], target: &[u8]) -> usize {
    let mut off = 0;
    let len = std::cmp::min(origin.len(), target.len());
    while off < len && origin[off] == target[off] {
        off += 1;
    }
    off
}

pub fn next_key(key: &mut Vec<u8>) {
    if *key.last().unwrap() < 255u8 {
        *key.last_mut().unwrap() += 1;
    } else {
        key.push(0);
    }
}

const MASK_DELTA: u32 = 0xa282ead8u32;

pub fn crc_mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub fn crc_unmask(masked_crc: u32) -> u32 {
    let rot = masked_crc.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_round_trip() {
        let cases: Vec<u64> = vec![0, 1, 127, 128, 300, 1 << 20, (1 << 35) + 7, u64::MAX];
        for c in cases {
            let mut buf = vec![];
            put_var_uint64(&mut buf, c);
            let mut offset = 0;
            assert_eq!(get_var_uint64(&buf, &mut offset), Some(c));
            assert_eq!(offset, buf.len());
        }
        let mut buf = vec![];
        put_varint32varint64(&mut buf, 77, 1 << 40);
        let mut offset = 0;
        assert_eq!(get_var_uint32(&buf, &mut offset), Some(77));
        assert_eq!(get_var_uint64(&buf[offset..], &mut offset), Some(1 << 40));
    }

    #[test]
    fn test_length_prefixed_slice() {
        let mut buf = vec![];
        put_length_prefixed_slice(&mut buf, b"hello");
        put_length_prefixed_slice(&mut buf, b"");
        let mut offset = 0;
        assert_eq!(get_length_prefixed_slice(&buf, &mut offset), Some(&b"hello"[..]));
        assert_eq!(get_length_prefixed_slice(&buf[offset..], &mut offset), Some(&b""[..]));
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_crc_mask() {
        let crc = crc32c::crc32c(b"some record payload");
        assert_ne!(crc, crc_mask(crc));
        assert_eq!(crc, crc_unmask(crc_mask(crc)));
    }
}
