/// Application data carried by the record layer.
///
/// The record layer fragments, compresses and encrypts these messages based
/// on the current connection state; at this level the contents are
/// transparent bytes (RFC 5246 section 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationData {
    pub data: Vec<u8>,
}

impl ApplicationData {
    /// Parse an application data record body. The entire input is the
    /// payload; there is no framing to interpret.
    pub fn parse(data: &[u8]) -> Option<(usize, ApplicationData)> {
        Some((data.len(), ApplicationData { data: data.to_vec() }))
    }

    pub fn serialize(&self, data: &mut Vec<u8>) {
        data.extend_from_slice(&self.data);
    }
}
