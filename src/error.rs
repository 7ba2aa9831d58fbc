use thiserror::Error;

/// Every error the assembler can raise. Assembly aborts on the first one;
/// see the module-level docs in `lib.rs` for the fail-fast contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("line {line}: duplicate symbol '{symbol}'")]
    DuplicateSymbol { line: usize, symbol: String },

    #[error("line {line}: undefined symbol '{symbol}'")]
    UndefinedSymbol { line: usize, symbol: String },

    #[error("line {line}: invalid BYTE operand '{operand}'")]
    InvalidByteOperand { line: usize, operand: String },

    #[error("line {line}: invalid opcode '{mnemonic}'")]
    InvalidOpcode { line: usize, mnemonic: String },

    #[error("line {line}: displacement out of range for '{symbol}' (disp {disp})")]
    DisplacementOutOfRange {
        line: usize,
        symbol: String,
        disp: i64,
    },

    #[error("line {line}: malformed line: {reason}")]
    MalformedLine { line: usize, reason: String },

    #[error("opcode table error in '{path}': {reason}")]
    OpTableError { path: String, reason: String },

    #[error("I/O error: {0}")]
    IOError(String),
}

pub type Result<T> = std::result::Result<T, AssembleError>;
