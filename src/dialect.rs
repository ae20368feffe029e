//! Dialect descriptor (C1): the serializer-facing knobs that vary across
//! SQL engines. A [Dialect] is an immutable value; [Dialect::customize]
//! returns a modified copy rather than mutating in place, mirroring how the
//! rest of this crate treats configuration as threaded-through data rather
//! than global state.

use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum VariableStyle {
    Named,
    Numbered,
    Positional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LimitStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
    /// `SELECT TOP n ...`
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum IdentifierCase {
    /// Identifiers pass through unchanged.
    AsWritten,
    Lower,
    Upper,
}

/// A dialect's `Frame`-exclusion capability: which of `EXCLUDE GROUP` /
/// `EXCLUDE TIES` / `EXCLUDE NO OTHERS` it accepts, if any (an Open Question
/// from the design notes — see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameExclusionSupport {
    None,
    Full,
}

/// How the serializer renders string concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringConcatForm {
    /// `a || b`
    DoublePipe,
    /// `a + b`
    Plus,
    /// `CONCAT(a, b)`
    ConcatFunction,
}

/// How the serializer renders a `Date` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateLiteralForm {
    /// A plain quoted string, relying on implicit conversion: `'2020-01-01'`.
    PlainString,
    /// A type-prefixed literal: `DATE '2020-01-01'`.
    Prefixed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dialect {
    pub name: String,
    pub identifier_quotes: (char, char),
    pub identifier_case: IdentifierCase,
    pub variable_style: VariableStyle,
    pub variable_prefix: char,
    pub has_as: bool,
    pub limit_style: LimitStyle,
    pub has_boolean_type: bool,
    /// Gates the `MATERIALIZED`/`NOT MATERIALIZED` CTE hint; the only
    /// dialect-varying feature in this slot is Postgres 12+'s CTE
    /// materialization hint (see DESIGN.md).
    pub has_generated_always: bool,
    pub has_lateral: bool,
    pub frame_exclusion: FrameExclusionSupport,
    pub string_concat: StringConcatForm,
    pub date_literal: DateLiteralForm,
}

impl Dialect {
    pub fn sqlite() -> Dialect {
        Dialect {
            name: "sqlite".into(),
            identifier_quotes: ('"', '"'),
            identifier_case: IdentifierCase::AsWritten,
            variable_style: VariableStyle::Named,
            variable_prefix: ':',
            has_as: true,
            limit_style: LimitStyle::LimitOffset,
            has_boolean_type: false,
            has_generated_always: false,
            has_lateral: false,
            frame_exclusion: FrameExclusionSupport::None,
            string_concat: StringConcatForm::DoublePipe,
            date_literal: DateLiteralForm::PlainString,
        }
    }

    pub fn postgres() -> Dialect {
        Dialect {
            name: "postgres".into(),
            identifier_quotes: ('"', '"'),
            identifier_case: IdentifierCase::Lower,
            variable_style: VariableStyle::Numbered,
            variable_prefix: '$',
            has_as: true,
            limit_style: LimitStyle::LimitOffset,
            has_boolean_type: true,
            has_generated_always: true,
            has_lateral: true,
            frame_exclusion: FrameExclusionSupport::Full,
            string_concat: StringConcatForm::DoublePipe,
            date_literal: DateLiteralForm::Prefixed("DATE"),
        }
    }

    pub fn mysql() -> Dialect {
        Dialect {
            name: "mysql".into(),
            identifier_quotes: ('`', '`'),
            identifier_case: IdentifierCase::AsWritten,
            variable_style: VariableStyle::Positional,
            variable_prefix: '?',
            has_as: true,
            limit_style: LimitStyle::LimitOffset,
            has_boolean_type: false,
            has_generated_always: false,
            has_lateral: true,
            frame_exclusion: FrameExclusionSupport::None,
            string_concat: StringConcatForm::ConcatFunction,
            date_literal: DateLiteralForm::PlainString,
        }
    }

    pub fn mssql() -> Dialect {
        Dialect {
            name: "mssql".into(),
            identifier_quotes: ('[', ']'),
            identifier_case: IdentifierCase::AsWritten,
            variable_style: VariableStyle::Named,
            variable_prefix: '@',
            has_as: true,
            limit_style: LimitStyle::Top,
            has_boolean_type: false,
            has_generated_always: false,
            has_lateral: false,
            frame_exclusion: FrameExclusionSupport::None,
            string_concat: StringConcatForm::Plus,
            date_literal: DateLiteralForm::PlainString,
        }
    }

    pub fn by_name(name: &str) -> Option<Dialect> {
        match name {
            "sqlite" => Some(Dialect::sqlite()),
            "postgres" | "postgresql" => Some(Dialect::postgres()),
            "mysql" => Some(Dialect::mysql()),
            "mssql" | "sqlserver" => Some(Dialect::mssql()),
            _ => None,
        }
    }

    /// Builder-style customization: `dialect.customize(|d| Dialect { has_lateral: false, ..d })`.
    pub fn customize(self, f: impl FnOnce(Dialect) -> Dialect) -> Dialect {
        f(self)
    }
}
