//! Field argument and directive handlers, plus mutation-kind detection.

use rustc_hash::FxHashSet;

use super::expr::{compile_filter_obj, set_filter, Exp, ExpOp, ExpVal};
use super::{Compiler, OrderBy, OrderDir, PagingType, QCode, QType, Select, SkipType};
use crate::error::{CompileError, Result};
use crate::graph::{Arg, Directive, Node};
use crate::schema::{DbType, RelType, Table};

impl Compiler {
    pub(crate) fn compile_directives(&self, sel: &mut Select, dirs: &[Directive]) -> Result<()> {
        for d in dirs {
            match d.name.as_str() {
                "skip" => self.directive_render_flag(sel, d, ExpOp::NotEqualsTrue, "skip")?,
                "include" => self.directive_render_flag(sel, d, ExpOp::EqualsTrue, "include")?,
                "object" => sel.singular = true,
                "not_related" => sel.rel.rel_type = RelType::Skip,
                "through" => self.directive_through(sel, d)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn directive_render_flag(
        &self,
        sel: &mut Select,
        d: &Directive,
        op: ExpOp,
        name: &'static str,
    ) -> Result<()> {
        let Some(arg) = d.args.first().filter(|a| a.name == "if") else {
            return Err(CompileError::DirectiveArg {
                directive: name,
                arg: "if",
            });
        };
        let Node::Var(var) = &arg.val else {
            return Err(CompileError::ArgType {
                arg: "if".to_owned(),
                expected: "variable",
            });
        };
        set_filter(&mut sel.filter, Exp::leaf(op, None, ExpVal::Var(var.clone())));
        Ok(())
    }

    fn directive_through(&self, sel: &mut Select, d: &Directive) -> Result<()> {
        let Some(arg) = d.args.first().filter(|a| a.name == "table") else {
            return Err(CompileError::DirectiveArg {
                directive: "through",
                arg: "table",
            });
        };
        let Node::Str(table) = &arg.val else {
            return Err(CompileError::ArgType {
                arg: "table".to_owned(),
                expected: "string",
            });
        };
        sel.through = Some(table.clone());
        Ok(())
    }

    pub(crate) fn compile_args(&self, sel: &mut Select, args: &[Arg], role: &str) -> Result<()> {
        for arg in args {
            match arg.name.as_str() {
                "id" => self.arg_id(sel, arg)?,
                "search" => self.arg_search(sel, arg)?,
                "where" => self.arg_where(sel, arg, role)?,
                "orderby" | "order_by" | "order" => self.arg_order_by(sel, arg)?,
                "distinct_on" | "distinct" => self.arg_distinct_on(sel, arg)?,
                "limit" => self.arg_limit(sel, arg)?,
                "offset" => self.arg_offset(sel, arg)?,
                "first" => self.arg_first_last(sel, arg, OrderDir::Asc)?,
                "last" => self.arg_first_last(sel, arg, OrderDir::Desc)?,
                "after" => self.arg_after_before(sel, arg, PagingType::Forward)?,
                "before" => self.arg_after_before(sel, arg, PagingType::Backward)?,
                "find" => self.arg_find(sel, arg)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn arg_id(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        if sel.parent_id != -1 {
            return Err(CompileError::IdNotRoot);
        }
        let pcol = sel
            .ti
            .primary_col
            .clone()
            .ok_or_else(|| CompileError::NoPrimaryKey(sel.table.clone()))?;

        let val = match &arg.val {
            Node::Num(n) => {
                n.parse::<i64>().map_err(|_| CompileError::ArgType {
                    arg: "id".to_owned(),
                    expected: "number, string or variable",
                })?;
                ExpVal::Num(n.clone())
            }
            Node::Str(s) => ExpVal::Str(s.clone()),
            Node::Var(v) => ExpVal::Var(v.clone()),
            _ => {
                return Err(CompileError::ArgType {
                    arg: "id".to_owned(),
                    expected: "number, string or variable",
                })
            }
        };

        set_filter(&mut sel.filter, Exp::leaf(ExpOp::Equals, Some(pcol), val));
        sel.singular = true;
        Ok(())
    }

    fn arg_search(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        if sel.ti.full_text.is_empty() {
            return Err(match self.schema.db_type() {
                DbType::Mysql => CompileError::NoFulltextIndex(sel.table.clone()),
                DbType::Postgres => CompileError::NoTsVector(sel.table.clone()),
            });
        }
        let Node::Var(var) = &arg.val else {
            return Err(CompileError::ArgType {
                arg: "search".to_owned(),
                expected: "variable",
            });
        };
        sel.add_arg("search", var.clone());
        set_filter(
            &mut sel.filter,
            Exp::leaf(ExpOp::TsQuery, None, ExpVal::Var(var.clone())),
        );
        Ok(())
    }

    fn arg_where(&self, sel: &mut Select, arg: &Arg, role: &str) -> Result<()> {
        let (exp, needs_user) = compile_filter_obj(&self.schema, &sel.ti, &arg.val)?;
        if needs_user && role == "anon" {
            sel.skip_render = SkipType::UserNeeded;
        }
        set_filter(&mut sel.filter, exp);
        Ok(())
    }

    fn arg_order_by(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        let Node::Obj(entries) = &arg.val else {
            return Err(CompileError::ArgType {
                arg: arg.name.clone(),
                expected: "object",
            });
        };

        let mut seen: FxHashSet<String> = sel
            .order_by
            .iter()
            .map(|ob| ob.col.name.clone())
            .collect();
        let mut list: Vec<OrderBy> = Vec::with_capacity(2);
        collect_order_by(&sel.ti, &arg.name, "", entries, &mut seen, &mut list)?;

        // Textually-later keys sort more significantly.
        sel.order_by.extend(list.into_iter().rev());
        Ok(())
    }

    fn arg_distinct_on(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        let mut cols = Vec::new();
        match &arg.val {
            Node::Str(name) => cols.push(sel.ti.get_column(name)?),
            Node::List(items) => {
                for item in items {
                    let Node::Str(name) = item else {
                        return Err(CompileError::ArgType {
                            arg: arg.name.clone(),
                            expected: "column name or list of column names",
                        });
                    };
                    cols.push(sel.ti.get_column(name)?);
                }
            }
            _ => {
                return Err(CompileError::ArgType {
                    arg: arg.name.clone(),
                    expected: "column name or list of column names",
                })
            }
        }

        // MySQL has no DISTINCT ON; fold into the ordering series instead.
        for col in cols {
            match self.schema.db_type() {
                DbType::Mysql => sel.order_by.push(OrderBy {
                    col,
                    dir: OrderDir::Asc,
                }),
                DbType::Postgres => sel.distinct_on.push(col),
            }
        }
        Ok(())
    }

    fn arg_limit(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        match &arg.val {
            Node::Num(n) => {
                sel.paging.limit = n.parse::<i32>().map_err(|_| CompileError::ArgType {
                    arg: arg.name.clone(),
                    expected: "number or variable",
                })?;
            }
            Node::Var(v) => {
                if self.schema.db_type() == DbType::Mysql {
                    return Err(CompileError::DbArgType {
                        db: "mysql",
                        arg: arg.name.clone(),
                        expected: "number",
                    });
                }
                sel.paging.limit_var = Some(v.clone());
            }
            _ => {
                return Err(CompileError::ArgType {
                    arg: arg.name.clone(),
                    expected: "number or variable",
                })
            }
        }
        Ok(())
    }

    fn arg_offset(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        match &arg.val {
            Node::Num(n) => {
                sel.paging.offset = n.parse::<i32>().map_err(|_| CompileError::ArgType {
                    arg: arg.name.clone(),
                    expected: "number or variable",
                })?;
            }
            Node::Var(v) => {
                if self.schema.db_type() == DbType::Mysql {
                    return Err(CompileError::DbArgType {
                        db: "mysql",
                        arg: arg.name.clone(),
                        expected: "number",
                    });
                }
                sel.paging.offset_var = Some(v.clone());
            }
            _ => {
                return Err(CompileError::ArgType {
                    arg: arg.name.clone(),
                    expected: "number or variable",
                })
            }
        }
        Ok(())
    }

    fn arg_first_last(&self, sel: &mut Select, arg: &Arg, dir: OrderDir) -> Result<()> {
        self.arg_limit(sel, arg)?;
        if !sel.singular {
            sel.paging.cursor = true;
        }
        sel.order_dir = dir;
        Ok(())
    }

    fn arg_after_before(&self, sel: &mut Select, arg: &Arg, pt: PagingType) -> Result<()> {
        match &arg.val {
            Node::Var(v) if v == "cursor" => {}
            _ => return Err(CompileError::CursorVar(arg.name.clone())),
        }
        sel.paging.typ = pt;
        if !sel.singular {
            sel.paging.cursor = true;
        }
        Ok(())
    }

    fn arg_find(&self, sel: &mut Select, arg: &Arg) -> Result<()> {
        if sel.rel.rel_type != RelType::Recursive {
            return Err(CompileError::FindNotRecursive(sel.field_name.clone()));
        }
        let Node::Str(v) = &arg.val else {
            return Err(CompileError::FindValues);
        };
        if v != "parents" && v != "children" {
            return Err(CompileError::FindValues);
        }
        sel.add_arg("find", v.clone());
        Ok(())
    }

    /// Derives the mutation sub-kind from the root field's arguments, and
    /// the variable binding the mutation payload.
    pub(crate) fn set_mutation_type(&self, qc: &mut QCode, args: &[Arg]) -> Result<()> {
        for arg in args {
            match arg.name.as_str() {
                "insert" => return self.set_action_var(qc, arg, QType::Insert),
                "update" => return self.set_action_var(qc, arg, QType::Update),
                "upsert" => return self.set_action_var(qc, arg, QType::Upsert),
                "delete" => {
                    qc.s_type = QType::Delete;
                    let Node::Bool(v) = &arg.val else {
                        return Err(CompileError::ArgType {
                            arg: "delete".to_owned(),
                            expected: "boolean",
                        });
                    };
                    if !v {
                        // `delete: false` downgrades to a plain query.
                        qc.q_type = QType::Query;
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn set_action_var(&self, qc: &mut QCode, arg: &Arg, st: QType) -> Result<()> {
        qc.s_type = st;
        let Node::Var(v) = &arg.val else {
            return Err(CompileError::ArgType {
                arg: arg.name.clone(),
                expected: "variable",
            });
        };
        qc.action_var = Some(v.clone());
        Ok(())
    }
}

/// Recursively flattens an order-by object into (column, direction) pairs,
/// joining nested keys into dotted column paths.
fn collect_order_by(
    ti: &Table,
    arg_name: &str,
    prefix: &str,
    entries: &[(String, Node)],
    seen: &mut FxHashSet<String>,
    out: &mut Vec<OrderBy>,
) -> Result<()> {
    for (key, val) in entries {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            Node::Str(dir) => {
                let dir = parse_order_dir(dir)?;
                let col = ti.get_column(&path)?;
                if !seen.insert(col.name.clone()) {
                    return Err(CompileError::DuplicateOrderBy(col.name));
                }
                out.push(OrderBy { col, dir });
            }
            Node::Obj(nested) => {
                collect_order_by(ti, arg_name, &path, nested, seen, out)?;
            }
            _ => {
                return Err(CompileError::ArgType {
                    arg: arg_name.to_owned(),
                    expected: "object of columns to sort directions",
                })
            }
        }
    }
    Ok(())
}

fn parse_order_dir(dir: &str) -> Result<OrderDir> {
    Ok(match dir {
        "asc" => OrderDir::Asc,
        "desc" => OrderDir::Desc,
        "asc_nulls_first" => OrderDir::AscNullsFirst,
        "asc_nulls_last" => OrderDir::AscNullsLast,
        "desc_nulls_first" => OrderDir::DescNullsFirst,
        "desc_nulls_last" => OrderDir::DescNullsLast,
        _ => return Err(CompileError::OrderDirection),
    })
}
