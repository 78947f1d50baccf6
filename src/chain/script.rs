//! Output script classification.

/// OP_FALSE
pub const OP_FALSE: u8 = 0x00;
/// OP_RETURN
pub const OP_RETURN: u8 = 0x6a;

/// Protocol identifier pushed by double-spend-notification outputs ("dsnt").
pub const DSNT_IDENTIFIER: [u8; 4] = *b"dsnt";

/// Data outputs start with OP_FALSE OP_RETURN. Value is irrelevant: burning
/// satoshis into a data output is the sender's business.
pub fn is_data_output(script: &[u8]) -> bool {
    script.len() > 1 && script[0] == OP_FALSE && script[1] == OP_RETURN
}

/// A DSNT output is a data output whose first push is the "dsnt" protocol
/// identifier: OP_FALSE OP_RETURN PUSH(4) 'd' 's' 'n' 't'.
pub fn is_dsnt_output(script: &[u8]) -> bool {
    let mut prefix = vec![OP_FALSE, OP_RETURN, DSNT_IDENTIFIER.len() as u8];
    prefix.extend_from_slice(&DSNT_IDENTIFIER);
    script.len() >= prefix.len() && script[..prefix.len()] == prefix[..]
}
