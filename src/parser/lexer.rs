//! Logos-based lexer for Oriel.
//!
//! Fast tokenization using the logos crate. Comments run from `--` to the
//! end of the line. Character and text literals share the escape set
//! `\n \t \' \" \\`; escapes are decoded later, when the parser cooks the
//! token values.

use logos::Logos;
use text_size::TextSize;

/// A token with its kind, raw text, and byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken<'a> {
    pub kind: TokKind,
    pub text: &'a str,
    pub offset: TextSize,
}

/// Lexer wrapping the logos-generated tokenizer.
pub struct Lexer<'a> {
    inner: logos::Lexer<'a, TokKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            inner: TokKind::lexer(input),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = RawToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.inner.next()?;
        let text = self.inner.slice();
        let offset = TextSize::new(self.inner.span().start as u32);
        let kind = result.unwrap_or(TokKind::Error);
        Some(RawToken { kind, text, offset })
    }
}

/// Tokenize an entire string into a Vec.
pub fn tokenize(input: &str) -> Vec<RawToken<'_>> {
    Lexer::new(input).collect()
}

/// Token kinds. Multi-character punctuation is declared before the
/// single-character prefixes it shares.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"--[^\n]*")]
pub enum TokKind {
    // =========================================================================
    // LITERALS
    // =========================================================================
    #[regex(r"[A-Za-z][A-Za-z0-9_]*", priority = 1)]
    Ident,

    #[regex(r"[0-9]+")]
    Int,

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?|[0-9]+[eE][+-]?[0-9]+")]
    Decimal,

    #[regex(r"'([^'\\\n]|\\.)*'")]
    Char,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    Text,

    // =========================================================================
    // TYPE KEYWORDS
    // =========================================================================
    #[token("Bool")]
    #[token("Boolean")]
    BoolKw,
    #[token("Byte")]
    ByteKw,
    #[token("Char")]
    #[token("Character")]
    CharKw,
    #[token("Decimal")]
    DecimalKw,
    #[token("Float")]
    FloatKw,
    #[token("Int")]
    #[token("Integer")]
    IntegerKw,
    #[token("Text")]
    TextKw,
    #[token("InputFile")]
    InputFileKw,
    #[token("OutputFile")]
    OutputFileKw,
    #[token("Void")]
    VoidKw,
    #[token("unsigned")]
    UnsignedKw,
    #[token("enum")]
    #[token("enumeration")]
    EnumKw,

    // =========================================================================
    // STRUCTURE KEYWORDS
    // =========================================================================
    #[token("protocol")]
    ProtocolKw,
    #[token("cell")]
    CellKw,
    #[token("process")]
    ProcessKw,
    #[token("procedure")]
    ProcedureKw,
    #[token("thread")]
    ThreadKw,
    #[token("native")]
    NativeKw,

    // =========================================================================
    // OTHER KEYWORDS
    // =========================================================================
    #[token("alias")]
    AliasKw,
    #[token("and")]
    AndKw,
    #[token("any")]
    AnyKw,
    #[token("cases")]
    CasesKw,
    #[token("copy")]
    CopyKw,
    #[token("div")]
    DivKw,
    #[token("do")]
    DoKw,
    #[token("domain")]
    DomainKw,
    #[token("elif")]
    ElifKw,
    #[token("else")]
    ElseKw,
    #[token("end")]
    EndKw,
    #[token("execute")]
    ExecuteKw,
    #[token("exit")]
    ExitKw,
    #[token("fair")]
    FairKw,
    #[token("false")]
    FalseKw,
    #[token("for")]
    ForKw,
    #[token("if")]
    IfKw,
    #[token("import")]
    ImportKw,
    #[token("in")]
    InKw,
    #[token("indexes")]
    IndexesKw,
    #[token("loop")]
    LoopKw,
    #[token("loopselect")]
    LoopSelectKw,
    #[token("mod")]
    ModKw,
    #[token("not")]
    NotKw,
    #[token("or")]
    OrKw,
    #[token("ordered")]
    OrderedKw,
    #[token("random")]
    RandomKw,
    #[token("range")]
    RangeKw,
    #[token("rem")]
    RemKw,
    #[token("select")]
    SelectKw,
    #[token("share")]
    ShareKw,
    #[token("skip")]
    SkipKw,
    #[token("start")]
    StartKw,
    #[token("step")]
    StepKw,
    #[token("such")]
    SuchKw,
    #[token("that")]
    ThatKw,
    #[token("then")]
    ThenKw,
    #[token("to")]
    ToKw,
    #[token("true")]
    TrueKw,
    #[token("until")]
    UntilKw,
    #[token("while")]
    WhileKw,

    // =========================================================================
    // MULTI-CHARACTER PUNCTUATION
    // =========================================================================
    #[token(":=")]
    Assign,
    #[token("<-")]
    Move,
    #[token("..")]
    Dots,
    #[token("//")]
    Cat,
    #[token("->")]
    Arrow,
    #[token("~=")]
    #[token("!=")]
    #[token("<>")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&=")]
    AndEq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("%%")]
    PercPerc,

    // =========================================================================
    // SINGLE-CHARACTER PUNCTUATION
    // =========================================================================
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("#")]
    Sharp,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("@")]
    At,
    #[token("|")]
    Bar,
    #[token("^")]
    Caret,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("?")]
    Question,

    /// Anything the lexer could not recognize.
    Error,

    /// End-of-file marker appended by the parser.
    Eof,
}

impl TokKind {
    /// A human-readable name for error messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokKind::Ident => "identifier",
            TokKind::Int => "integer literal",
            TokKind::Decimal => "decimal literal",
            TokKind::Char => "character literal",
            TokKind::Text => "text literal",
            TokKind::Assign => "':='",
            TokKind::Move => "'<-'",
            TokKind::Dots => "'..'",
            TokKind::Cat => "'//'",
            TokKind::Arrow => "'->'",
            TokKind::Eq => "'='",
            TokKind::Ne => "'~='",
            TokKind::Lt => "'<'",
            TokKind::Le => "'<='",
            TokKind::Gt => "'>'",
            TokKind::Ge => "'>='",
            TokKind::Bar => "'|'",
            TokKind::Caret => "'^'",
            TokKind::Dot => "'.'",
            TokKind::Comma => "','",
            TokKind::Colon => "':'",
            TokKind::Semicolon => "';'",
            TokKind::Question => "'?'",
            TokKind::LParen => "'('",
            TokKind::RParen => "')'",
            TokKind::LBracket => "'['",
            TokKind::RBracket => "']'",
            TokKind::LBrace => "'{'",
            TokKind::RBrace => "'}'",
            TokKind::EndKw => "'end'",
            TokKind::ThenKw => "'then'",
            TokKind::DoKw => "'do'",
            TokKind::Eof => "end of file",
            _ => "token",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokKind> {
        tokenize(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("skip -- the rest is noise\nexit"),
            vec![TokKind::SkipKw, TokKind::ExitKw]
        );
    }

    #[test]
    fn range_does_not_lex_as_decimal() {
        assert_eq!(
            kinds("1..5"),
            vec![TokKind::Int, TokKind::Dots, TokKind::Int]
        );
        assert_eq!(kinds("1.5"), vec![TokKind::Decimal]);
        assert_eq!(kinds("2e10"), vec![TokKind::Decimal]);
    }

    #[test]
    fn move_binds_tighter_than_less_than() {
        assert_eq!(kinds("x <- y"), vec![TokKind::Ident, TokKind::Move, TokKind::Ident]);
        assert_eq!(
            kinds("x < -y"),
            vec![TokKind::Ident, TokKind::Lt, TokKind::Minus, TokKind::Ident]
        );
    }

    #[test]
    fn concatenation_is_not_a_comment() {
        assert_eq!(
            kinds(r#""a" // "b""#),
            vec![TokKind::Text, TokKind::Cat, TokKind::Text]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("process idle end"),
            vec![TokKind::ProcessKw, TokKind::Ident, TokKind::EndKw]
        );
    }

    #[test]
    fn offsets_advance() {
        let tokens = tokenize("a b");
        assert_eq!(u32::from(tokens[0].offset), 0);
        assert_eq!(u32::from(tokens[1].offset), 2);
    }
}
