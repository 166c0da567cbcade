//! Sieve AST (spec §3: "Sieve script and AST"). Grounded on the command/
//! action vocabulary in `original_source/sieved/sievecommand.h` and
//! `original_source/sieved/sieveaction.h`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    AsciiCasemap,
    Octet,
}

impl Default for Comparator {
    fn default() -> Self {
        Comparator::AsciiCasemap
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Is,
    Contains,
    Matches,
}

impl Default for MatchType {
    fn default() -> Self {
        MatchType::Is
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPart {
    All,
    Localpart,
    Domain,
}

impl Default for AddressPart {
    fn default() -> Self {
        AddressPart::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopePart {
    From,
    To,
}

/// A leaf or internal node of a Sieve test expression tree (spec §3).
#[derive(Debug, Clone)]
pub enum Test {
    Address {
        header_names: Vec<String>,
        address_part: AddressPart,
        comparator: Comparator,
        match_type: MatchType,
        keys: Vec<String>,
    },
    Envelope {
        parts: Vec<EnvelopePart>,
        comparator: Comparator,
        match_type: MatchType,
        keys: Vec<String>,
    },
    Header {
        header_names: Vec<String>,
        comparator: Comparator,
        match_type: MatchType,
        keys: Vec<String>,
    },
    Exists {
        header_names: Vec<String>,
    },
    Size {
        over: bool,
        limit: u64,
    },
    True,
    False,
    AllOf(Vec<Test>),
    AnyOf(Vec<Test>),
    Not(Box<Test>),
}

/// A branch of an `if`/`elsif`/`else` chain. `test: None` marks the trailing
/// `else` (always taken if reached).
#[derive(Debug, Clone)]
pub struct Branch {
    pub test: Option<Test>,
    pub body: Block,
}

pub type Block = Vec<Command>;

#[derive(Debug, Clone)]
pub enum Command {
    Require(Vec<String>),
    If(Vec<Branch>),
    Stop,
    Reject { reason: String },
    FileInto { mailbox: String },
    Redirect { address: String },
    Keep,
    Discard,
    Vacation { reason: String },
}
