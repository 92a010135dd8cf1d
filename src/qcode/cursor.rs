//! Keyset-pagination planning: tie-breaker ordering and seek predicates.

use super::expr::{set_filter, Exp, ExpOp, ExpVal};
use super::{Config, OrderBy, OrderDir, Select};
use crate::error::{CompileError, Result};

/// Alias the renderer binds to the decoded cursor row.
pub const CURSOR_ALIAS: &str = "__cur";

/// Appends the uniqueness tie-breaker to the select's order series.
///
/// Keyset paging is only total when the last ordering column is unique, so
/// the configured cursor column (when present on the table) or the primary
/// key goes last, in the direction requested by `first`/`last`. A column
/// already in the series is left where the user put it.
pub(crate) fn order_by_tie_breaker(config: &Config, sel: &mut Select) -> Result<()> {
    let col = config
        .cursor_column
        .as_deref()
        .and_then(|name| sel.ti.column(name).cloned())
        .or_else(|| sel.ti.primary_col.clone())
        .ok_or_else(|| CompileError::NoPrimaryKey(sel.table.clone()))?;

    if sel.order_by.iter().any(|ob| ob.col.name == col.name) {
        return Ok(());
    }
    sel.order_by.push(OrderBy {
        col,
        dir: sel.order_dir,
    });
    Ok(())
}

/// Synthesises the tuple-comparison seek predicate for the current order
/// series and ANDs it into the select's filter.
///
/// For ordering columns (A, B, C) the generated disjunction is
///
/// ```text
/// (A is null) OR (A > X) OR (A = X AND B > Y) OR (A = X AND B = Y AND C > Z)
/// ```
///
/// where X, Y, Z reference the cursor-row alias and the comparison flips to
/// `<` on descending columns. The leading null test covers the first page,
/// where no cursor row exists yet.
pub(crate) fn add_seek_predicate(sel: &mut Select) {
    let ob_len = sel.order_by.len();
    if ob_len == 0 {
        return;
    }

    let first = &sel.order_by[0];
    let mut or = Exp::branch(
        ExpOp::Or,
        vec![Exp::leaf(
            ExpOp::IsNull,
            Some(first.col.clone()),
            ExpVal::Ref {
                table: CURSOR_ALIAS.to_owned(),
                col: first.col.clone(),
            },
        )],
    );

    for i in 0..ob_len {
        let mut and = if i != 0 {
            Some(Exp::branch(ExpOp::And, Vec::new()))
        } else {
            None
        };

        for (n, ob) in sel.order_by.iter().enumerate() {
            if n > i {
                break;
            }
            let op = if i > 0 && n != i {
                ExpOp::Equals
            } else if ob.dir == OrderDir::Desc {
                ExpOp::LesserThan
            } else {
                ExpOp::GreaterThan
            };
            let leaf = Exp::leaf(
                op,
                Some(ob.col.clone()),
                ExpVal::Ref {
                    table: CURSOR_ALIAS.to_owned(),
                    col: ob.col.clone(),
                },
            );
            match and.as_mut() {
                Some(a) => a.children.push(leaf),
                None => or.children.push(leaf),
            }
        }

        if let Some(a) = and {
            or.children.push(a);
        }
    }

    set_filter(&mut sel.filter, or);
}
