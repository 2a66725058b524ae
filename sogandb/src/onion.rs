//! The onion model: onion names, security levels, and legal transitions.
//!
//! Each encrypted column carries one ciphertext column ("onion") per class
//! of operations it must support. Every onion is an ordered stack of
//! encryption layers; the *level* of an onion is the level of its outermost
//! surviving layer. Levels are totally ordered within one onion only —
//! comparing levels across onions is meaningless.

use crate::error::Error;

/// Storage type of a logical column. Everything the engine handles is one
/// of these two; the SQL rewriter maps the DBMS zoo of column types onto
/// them before calling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 64-bit integer columns.
    Integer,
    /// Text and blob columns.
    Text,
}

/// A named class of ciphertext held for one column.
///
/// The declaration order is the fixed tie-break order used when several
/// onions could serve the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Onion {
    /// Equality within one column (and, one peel deeper, cross-column join).
    Det,
    /// Order comparisons and ranges.
    Ope,
    /// Additive aggregation.
    Agg,
    /// Keyword existence on text.
    Search,
    /// No encryption; carrier for non-sensitive columns.
    Plain,
}

impl Onion {
    /// Stable tag used in serialized records and anonymized names.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Det => "DET",
            Self::Ope => "OPE",
            Self::Agg => "AGG",
            Self::Search => "SEARCH",
            Self::Plain => "PLAIN",
        }
    }

    /// Parses a tag written by [`Onion::tag`].
    pub fn from_tag(tag: &str) -> Result<Self, Error> {
        match tag {
            "DET" => Ok(Self::Det),
            "OPE" => Ok(Self::Ope),
            "AGG" => Ok(Self::Agg),
            "SEARCH" => Ok(Self::Search),
            "PLAIN" => Ok(Self::Plain),
            other => Err(Error::corrupt(format!("unknown onion tag `{other}`"))),
        }
    }

    /// The innermost pseudo-level of this onion: the cleartext carrier a
    /// full decryption bottoms out at.
    #[must_use]
    pub const fn plain_level(self) -> SecLevel {
        match self {
            Self::Det => SecLevel::PlainDet,
            Self::Ope => SecLevel::PlainOpe,
            Self::Agg => SecLevel::PlainAgg,
            Self::Search => SecLevel::PlainSearch,
            Self::Plain => SecLevel::Plain,
        }
    }
}

/// Position of a layer inside its onion's ordered sequence.
///
/// Variants are declared innermost-first per onion, so the derived order
/// agrees with "strictly stronger" *within* one onion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecLevel {
    /// DET onion fully peeled: cleartext.
    PlainDet,
    /// Deterministic under the process-wide join-equivalence key.
    DetJoin,
    /// Deterministic under the per-column key.
    Det,
    /// Randomized outer shell of the DET onion.
    RndDet,

    /// OPE onion fully peeled: cleartext.
    PlainOpe,
    /// Common comparison level for integer columns; carries the value
    /// unchanged. Never exists for text.
    OpeJoin,
    /// Order-preserving under the per-column key.
    Ope,
    /// Randomized outer shell of the OPE onion.
    RndOpe,

    /// AGG onion fully peeled: cleartext.
    PlainAgg,
    /// Additively homomorphic (Paillier).
    Hom,

    /// SEARCH onion fully peeled: cleartext.
    PlainSearch,
    /// Searchable encryption blocks.
    Swp,

    /// The single level of the PLAIN onion.
    Plain,
}

impl SecLevel {
    /// The onion this level belongs to.
    #[must_use]
    pub const fn onion(self) -> Onion {
        match self {
            Self::PlainDet | Self::DetJoin | Self::Det | Self::RndDet => Onion::Det,
            Self::PlainOpe | Self::OpeJoin | Self::Ope | Self::RndOpe => Onion::Ope,
            Self::PlainAgg | Self::Hom => Onion::Agg,
            Self::PlainSearch | Self::Swp => Onion::Search,
            Self::Plain => Onion::Plain,
        }
    }

    /// Whether this is a cleartext carrier level.
    #[must_use]
    pub const fn is_plain(self) -> bool {
        matches!(
            self,
            Self::PlainDet | Self::PlainOpe | Self::PlainAgg | Self::PlainSearch | Self::Plain
        )
    }

    /// Stable tag used in serialized records and key derivation.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::PlainDet => "PLAIN_DET",
            Self::DetJoin => "DET_JOIN",
            Self::Det => "DET",
            Self::RndDet => "RND_DET",
            Self::PlainOpe => "PLAIN_OPE",
            Self::OpeJoin => "OPE_JOIN",
            Self::Ope => "OPE",
            Self::RndOpe => "RND_OPE",
            Self::PlainAgg => "PLAIN_AGG",
            Self::Hom => "HOM",
            Self::PlainSearch => "PLAIN_SEARCH",
            Self::Swp => "SWP",
            Self::Plain => "PLAIN",
        }
    }

    /// Parses a tag written by [`SecLevel::tag`].
    pub fn from_tag(tag: &str) -> Result<Self, Error> {
        match tag {
            "PLAIN_DET" => Ok(Self::PlainDet),
            "DET_JOIN" => Ok(Self::DetJoin),
            "DET" => Ok(Self::Det),
            "RND_DET" => Ok(Self::RndDet),
            "PLAIN_OPE" => Ok(Self::PlainOpe),
            "OPE_JOIN" => Ok(Self::OpeJoin),
            "OPE" => Ok(Self::Ope),
            "RND_OPE" => Ok(Self::RndOpe),
            "PLAIN_AGG" => Ok(Self::PlainAgg),
            "HOM" => Ok(Self::Hom),
            "PLAIN_SEARCH" => Ok(Self::PlainSearch),
            "SWP" => Ok(Self::Swp),
            "PLAIN" => Ok(Self::Plain),
            other => Err(Error::corrupt(format!("unknown level tag `{other}`"))),
        }
    }

    /// Numeric tag mixed into key derivation. Stable across releases; never
    /// reuse a retired value.
    #[must_use]
    pub const fn key_tag(self) -> u32 {
        match self {
            Self::PlainDet => 0,
            Self::DetJoin => 1,
            Self::Det => 2,
            Self::RndDet => 3,
            Self::PlainOpe => 4,
            Self::OpeJoin => 5,
            Self::Ope => 6,
            Self::RndOpe => 7,
            Self::PlainAgg => 8,
            Self::Hom => 9,
            Self::PlainSearch => 10,
            Self::Swp => 11,
            Self::Plain => 12,
        }
    }
}

/// The next level inward (one peel) from `level` for a column of type
/// `ftype`.
///
/// Text OPE has no join level: peeling OPE for text lands directly on the
/// cleartext carrier.
///
/// # Errors
///
/// [`Error::Level`] if `level` is already the innermost carrier.
pub fn next_inner(level: SecLevel, ftype: FieldType) -> Result<SecLevel, Error> {
    let next = match (level, ftype) {
        (SecLevel::RndDet, _) => SecLevel::Det,
        (SecLevel::Det, _) => SecLevel::DetJoin,
        (SecLevel::DetJoin, _) => SecLevel::PlainDet,

        (SecLevel::RndOpe, _) => SecLevel::Ope,
        (SecLevel::Ope, FieldType::Integer) => SecLevel::OpeJoin,
        (SecLevel::Ope, FieldType::Text) => SecLevel::PlainOpe,
        (SecLevel::OpeJoin, _) => SecLevel::PlainOpe,

        (SecLevel::Hom, _) => SecLevel::PlainAgg,
        (SecLevel::Swp, _) => SecLevel::PlainSearch,

        (from, _) => {
            return Err(Error::Level { onion: from.onion(), from, to: from.onion().plain_level() })
        }
    };
    Ok(next)
}

/// The next level outward (one wrap) from `level` for a column of type
/// `ftype`. Inverse of [`next_inner`].
///
/// # Errors
///
/// [`Error::Level`] if `level` is already the outermost.
pub fn next_outer(level: SecLevel, ftype: FieldType) -> Result<SecLevel, Error> {
    let next = match (level, ftype) {
        (SecLevel::PlainDet, _) => SecLevel::DetJoin,
        (SecLevel::DetJoin, _) => SecLevel::Det,
        (SecLevel::Det, _) => SecLevel::RndDet,

        (SecLevel::PlainOpe, FieldType::Integer) => SecLevel::OpeJoin,
        (SecLevel::PlainOpe, FieldType::Text) => SecLevel::Ope,
        (SecLevel::OpeJoin, _) => SecLevel::Ope,
        (SecLevel::Ope, _) => SecLevel::RndOpe,

        (SecLevel::PlainAgg, _) => SecLevel::Hom,
        (SecLevel::PlainSearch, _) => SecLevel::Swp,

        (from, _) => {
            return Err(Error::Level { onion: from.onion(), from, to: from })
        }
    };
    Ok(next)
}

/// The initial layer stack for `onion` on a column of type `ftype`,
/// innermost-first. Empty when the onion does not exist for the type.
#[must_use]
pub fn initial_layers(onion: Onion, ftype: FieldType) -> Vec<SecLevel> {
    match (onion, ftype) {
        (Onion::Det, _) => vec![SecLevel::DetJoin, SecLevel::Det, SecLevel::RndDet],
        (Onion::Ope, FieldType::Integer) => {
            vec![SecLevel::OpeJoin, SecLevel::Ope, SecLevel::RndOpe]
        }
        (Onion::Ope, FieldType::Text) => vec![SecLevel::Ope, SecLevel::RndOpe],
        (Onion::Agg, FieldType::Integer) => vec![SecLevel::Hom],
        (Onion::Agg, FieldType::Text) => vec![],
        (Onion::Search, FieldType::Text) => vec![SecLevel::Swp],
        (Onion::Search, FieldType::Integer) => vec![],
        (Onion::Plain, _) => vec![SecLevel::Plain],
    }
}

/// The onion layout of a freshly created column: which onions exist and
/// their initial stacks, innermost-first.
#[must_use]
pub fn onion_layout(ftype: FieldType, sensitive: bool) -> Vec<(Onion, Vec<SecLevel>)> {
    if !sensitive {
        return vec![(Onion::Plain, initial_layers(Onion::Plain, ftype))];
    }
    let onions = match ftype {
        FieldType::Integer => [Onion::Det, Onion::Ope, Onion::Agg].as_slice(),
        FieldType::Text => [Onion::Det, Onion::Ope, Onion::Search].as_slice(),
    };
    onions.iter().map(|&o| (o, initial_layers(o, ftype))).collect()
}

/// A class of SQL operation the rewriter wants to run over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    /// Equality within one column.
    Eq,
    /// Order comparison / range.
    Order,
    /// Additive aggregate.
    Sum,
    /// Keyword existence.
    Search,
    /// Cross-column equality join.
    Join,
}

/// Whether a column sitting at `level` can serve `op` without peeling.
#[must_use]
pub fn level_supports(level: SecLevel, op: SqlOp) -> bool {
    if level == SecLevel::Plain {
        return true;
    }
    match op {
        SqlOp::Eq => matches!(level, SecLevel::Det | SecLevel::DetJoin | SecLevel::PlainDet),
        SqlOp::Order => {
            matches!(level, SecLevel::Ope | SecLevel::OpeJoin | SecLevel::PlainOpe)
        }
        SqlOp::Sum => matches!(level, SecLevel::Hom | SecLevel::PlainAgg),
        SqlOp::Search => matches!(level, SecLevel::Swp | SecLevel::PlainSearch),
        SqlOp::Join => matches!(level, SecLevel::DetJoin | SecLevel::PlainDet),
    }
}

/// Picks the onion that should serve `op` given the column's current onion
/// levels.
///
/// Preference: fewest peels first, then the fixed order DET < OPE < AGG <
/// SEARCH. Returns the onion together with the level the column must be
/// brought to (equal to the current level when no peeling is needed), or
/// `None` when no onion on this column can ever serve the operation.
#[must_use]
pub fn choose_onion(
    op: SqlOp,
    ftype: FieldType,
    current: &[(Onion, SecLevel)],
) -> Option<(Onion, SecLevel)> {
    let mut best: Option<(u32, Onion, SecLevel)> = None;
    for &(onion, top) in current {
        let Some((peels, target)) = peels_to_support(op, ftype, top) else {
            continue;
        };
        let candidate = (peels, onion, target);
        match &best {
            Some((best_peels, best_onion, _))
                if (*best_peels, *best_onion) <= (peels, onion) => {}
            _ => best = Some(candidate),
        }
    }
    best.map(|(_, onion, level)| (onion, level))
}

/// Number of peels needed from `top` until a level supporting `op` is
/// reached, along with that level. `None` if no inner level supports it.
fn peels_to_support(op: SqlOp, ftype: FieldType, top: SecLevel) -> Option<(u32, SecLevel)> {
    let mut level = top;
    let mut peels = 0;
    loop {
        if level_supports(level, op) {
            // A plain carrier reached by peeling means the onion cannot
            // serve the operation in ciphertext; only the PLAIN onion
            // itself counts.
            if level.is_plain() && level != SecLevel::Plain {
                return None;
            }
            return Some((peels, level));
        }
        level = next_inner(level, ftype).ok()?;
        peels += 1;
    }
}
