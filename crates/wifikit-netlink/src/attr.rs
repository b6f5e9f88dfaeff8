//! Bounds-checked cursors over netlink attributes and 802.11 information elements.
//!
//! Both cursors stop at the first triple whose declared length would run past the
//! supplied buffer, so a truncated or corrupt nest simply yields fewer items.

const NLA_HDRLEN: usize = 4;
const NLA_TYPE_MASK: u16 = 0x3fff;

/// One netlink attribute borrowed from a response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlAttrSlice<'a> {
    pub nla_type: u16,
    pub payload: &'a [u8],
}

impl<'a> NlAttrSlice<'a> {
    pub fn as_u16(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(u16::from_ne_bytes(bytes))
    }

    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_u32().map(|v| v as i32)
    }

    /// Nested attributes carried in this attribute's payload.
    pub fn nested(&self) -> AttrCursor<'a> {
        AttrCursor::new(self.payload)
    }
}

/// Iterator over a netlink attribute set (`len`, `type`, payload, 4-byte aligned).
#[derive(Debug, Clone)]
pub struct AttrCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> AttrCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// First attribute of the given type, if any.
    pub fn find_type(mut self, nla_type: u16) -> Option<NlAttrSlice<'a>> {
        Iterator::find(&mut self, |attr| attr.nla_type == nla_type)
    }
}

impl<'a> Iterator for AttrCursor<'a> {
    type Item = NlAttrSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.buf.len().checked_sub(self.offset)?;
        if remaining < NLA_HDRLEN {
            return None;
        }
        let header = &self.buf[self.offset..self.offset + NLA_HDRLEN];
        let len = u16::from_ne_bytes([header[0], header[1]]) as usize;
        let nla_type = u16::from_ne_bytes([header[2], header[3]]) & NLA_TYPE_MASK;
        if len < NLA_HDRLEN || len > remaining {
            // Corrupt length ends the walk.
            self.offset = self.buf.len();
            return None;
        }
        let payload = &self.buf[self.offset + NLA_HDRLEN..self.offset + len];
        let aligned = (len + 3) & !3;
        self.offset = self.offset.saturating_add(aligned).min(self.buf.len());
        Some(NlAttrSlice { nla_type, payload })
    }
}

/// One information element (`id`, `len`, body) from a beacon/probe-response blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoElement<'a> {
    pub id: u8,
    pub body: &'a [u8],
}

/// Iterator over 802.11 information elements.
#[derive(Debug, Clone)]
pub struct IeCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> IeCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for IeCursor<'a> {
    type Item = InfoElement<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.buf.len().checked_sub(self.offset)?;
        if remaining < 2 {
            return None;
        }
        let id = self.buf[self.offset];
        let len = self.buf[self.offset + 1] as usize;
        if len > remaining - 2 {
            self.offset = self.buf.len();
            return None;
        }
        let start = self.offset + 2;
        let body = &self.buf[start..start + len];
        self.offset = start + len;
        Some(InfoElement { id, body })
    }
}

/// Encode one attribute with padding. Used for request payloads and tests.
pub fn encode_attr(nla_type: u16, payload: &[u8]) -> Vec<u8> {
    let len = (NLA_HDRLEN + payload.len()) as u16;
    let mut out = Vec::with_capacity(((len as usize) + 3) & !3);
    out.extend_from_slice(&len.to_ne_bytes());
    out.extend_from_slice(&nla_type.to_ne_bytes());
    out.extend_from_slice(payload);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}
