//! Row identifiers of a module's tables.
//!
//! A [`Token`] packs a table id into its top byte and a 1-based row number into the lower
//! 24 bits. Tokens of a module survive rewriting: removing a member never renumbers the
//! others, and new methods are appended after the highest row in use (see
//! [`crate::metadata::module::ModuleDefinition::allocate_method_token`]).

use std::fmt;

/// Table id and row of a module member.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Type definitions
    pub const TYPE_DEF: u8 = 0x02;
    /// Field definitions
    pub const FIELD: u8 = 0x04;
    /// Method definitions
    pub const METHOD_DEF: u8 = 0x06;
    /// Member references
    pub const MEMBER_REF: u8 = 0x0A;

    const ROW_MASK: u32 = 0x00FF_FFFF;

    /// Token of row `row` in table `table`; rows above 24 bits are truncated
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & Self::ROW_MASK))
    }

    /// Encoded value as stored in instruction streams
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Table id
    #[must_use]
    pub fn table(self) -> u8 {
        self.0.to_be_bytes()[0]
    }

    /// Row number
    #[must_use]
    pub fn row(self) -> u32 {
        self.0 & Self::ROW_MASK
    }

    /// The empty token, used for "no reference"
    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:#04x}:{})", self.table(), self.row())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_table_and_row() {
        let token = Token::from_parts(Token::MEMBER_REF, 5);
        assert_eq!(token.value(), 0x0A00_0005);
        assert_eq!(token.table(), Token::MEMBER_REF);
        assert_eq!(token.row(), 5);

        let truncated = Token::from_parts(Token::FIELD, 0x01FF_FFFF);
        assert_eq!(truncated.table(), Token::FIELD);
        assert_eq!(truncated.row(), 0x00FF_FFFF);
        assert!(Token::default().is_null());
    }

    #[test]
    fn formatting() {
        let token = Token(0x0600_0010);
        assert_eq!(token.to_string(), "0x06000010");
        assert_eq!(format!("{token:?}"), "Token(0x06:16)");
    }

    #[test]
    fn ordered_by_table_then_row() {
        let mut tokens = vec![
            Token::from_parts(Token::METHOD_DEF, 3),
            Token::from_parts(Token::FIELD, 9),
            Token::from_parts(Token::METHOD_DEF, 1),
        ];
        tokens.sort();
        let rows: Vec<(u8, u32)> = tokens.iter().map(|t| (t.table(), t.row())).collect();
        assert_eq!(rows, vec![(0x04, 9), (0x06, 1), (0x06, 3)]);
    }
}
