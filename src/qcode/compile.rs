//! The select-compilation driver.
//!
//! A work stack of (field id, parent select id) pairs walks the parsed
//! field tree; every popped field allocates one dense-id select, binds it to
//! a schema table and relationship path, dispatches argument and directive
//! handlers, and enqueues its sub-selections.

use std::sync::Arc;

use tracing::debug;

use super::cursor;
use super::fns::{self, FieldClass, FuncCall};
use super::{
    Column, Compiler, Function, PagingType, QCode, QType, SelType, Select, SkipType, Variables,
    MAX_SELECTORS,
};
use crate::error::{CompileError, Result};
use crate::graph::{Field, FieldType, OpType, Operation};
use crate::schema::{path_to_rel, singularize, Rel, RelType};

impl Compiler {
    /// Compiles a parsed operation under the given role into [`QCode`].
    pub fn compile(&self, op: &Operation, vars: Variables, role: &str) -> Result<QCode> {
        debug!(%role, op_type = ?op.op_type, "compiling operation");

        let mut qc = QCode {
            q_type: match op.op_type {
                OpType::Query => QType::Query,
                OpType::Subscription => QType::Subscription,
                OpType::Mutation => QType::Mutation,
            },
            s_type: QType::Query,
            action_var: None,
            selects: Vec::with_capacity(5),
            roots: Default::default(),
            vars,
            schema: Arc::clone(&self.schema),
            remotes: 0,
        };

        if op.fields.is_empty() {
            return Err(CompileError::EmptyQuery);
        }
        if op.op_type == OpType::Mutation {
            self.set_mutation_type(&mut qc, &op.fields[0].args)?;
        }
        self.compile_query(&mut qc, op, role)?;
        Ok(qc)
    }

    fn compile_query(&self, qc: &mut QCode, op: &Operation, role: &str) -> Result<()> {
        // Roots go on in reverse so pops come back in document order.
        let mut stack: Vec<(i32, i32)> = op
            .fields
            .iter()
            .filter(|f| f.parent_id == -1)
            .rev()
            .map(|f| (f.id, -1))
            .collect();
        let mut next_id: i32 = 0;

        while let Some((fid, parent_id)) = stack.pop() {
            if next_id as usize >= MAX_SELECTORS {
                return Err(CompileError::SelectorLimit(MAX_SELECTORS));
            }

            let field = &op.fields[fid as usize];
            // Keyword fields such as a root `posts_cursor` projection are
            // handled by cursor synthesis, not by selection.
            if field.typ == FieldType::Keyword {
                continue;
            }

            let mut sel = Select::new(next_id, parent_id, field.output_name());

            self.compile_directives(&mut sel, &field.directives)?;
            self.add_rel_info(op, qc, &mut sel, field)?;

            let policy = self.get_role(role, &field.name);
            if policy.is_skipped(qc.s_type) {
                sel.skip_render = SkipType::UserNeeded;
            } else {
                policy.is_blocked(qc.s_type, role, &field.name)?;
            }

            self.set_limit(policy, qc, &mut sel);
            self.compile_args(&mut sel, &field.args, role)?;
            self.compile_columns(&mut stack, op, &mut sel, field)?;

            // Baseline filters come last so they wrap user conditions.
            if self.add_filters(qc, &mut sel, policy) && role == "anon" {
                sel.skip_render = SkipType::UserNeeded;
            }

            if sel.paging.cursor {
                cursor::order_by_tie_breaker(&self.config, &mut sel)?;
                if sel.paging.typ != PagingType::Offset {
                    cursor::add_seek_predicate(&mut sel);
                }
            }

            self.validate_select(&sel)?;
            qc.selects.push(sel);
            next_id += 1;
        }

        if next_id == 0 {
            return Err(CompileError::EmptyQuery);
        }
        Ok(())
    }

    /// Links the select into the tree and binds its table and relationship.
    fn add_rel_info(
        &self,
        op: &Operation,
        qc: &mut QCode,
        sel: &mut Select,
        field: &Field,
    ) -> Result<()> {
        let mut child_name = field.name.as_str();
        let mut parent_name = "";
        let mut parent_singular = false;

        if sel.parent_id == -1 {
            qc.roots.push(sel.id);
        } else {
            let psel = &mut qc.selects[sel.parent_id as usize];
            psel.children.push(sel.id);
            parent_singular = psel.singular;
            parent_name = op.fields[field.parent_id as usize].name.as_str();
        }

        match field.typ {
            FieldType::Union => {
                sel.typ = SelType::Union;
                if sel.parent_id == -1 {
                    return Err(CompileError::UnionParent);
                }
            }
            FieldType::Member => {
                // Members join the way their union parent does: the union
                // field is looked up against the grandparent table.
                sel.typ = SelType::Member;
                sel.singular = parent_singular;
                let union_field = &op.fields[field.parent_id as usize];
                child_name = union_field.name.as_str();
                parent_name = op.fields[union_field.parent_id as usize].name.as_str();
            }
            _ => {}
        }

        if sel.rel.rel_type == RelType::Skip {
            sel.rel = Rel::default();
            return Ok(());
        }

        if sel.parent_id != -1 {
            let mut paths = self
                .schema
                .find_path(child_name, parent_name, sel.through.as_deref())?
                .into_iter();
            let Some(first) = paths.next() else {
                return Err(CompileError::NoRelationship {
                    child: child_name.to_owned(),
                    parent: parent_name.to_owned(),
                });
            };
            sel.rel = path_to_rel(first);
            sel.joins = paths.map(path_to_rel).collect();
        }

        if sel.parent_id == -1 || sel.rel.rel_type == RelType::Polymorphic {
            sel.ti = self.schema.find(&self.config.db_schema, &field.name)?;
        } else {
            sel.ti = sel.rel.left.table.clone();
        }

        if sel.ti.blocked {
            return Err(CompileError::TableBlocked(field.name.clone()));
        }
        sel.table = sel.ti.name.clone();

        if sel.rel.rel_type == RelType::Remote {
            sel.table = field.name.clone();
            sel.skip_render = SkipType::Remote;
            qc.remotes += 1;
            return Ok(());
        }

        // The parent side of the join must be projected even when it is not
        // selected; the edge touching the parent is the last join step.
        if sel.parent_id != -1 && sel.rel.rel_type != RelType::None {
            let pcol = sel
                .joins
                .last()
                .map(|j| j.right.col.clone())
                .unwrap_or_else(|| sel.rel.right.col.clone());
            qc.selects[sel.parent_id as usize].add_bcol(pcol);
        }

        self.set_singular(&field.name, sel);
        Ok(())
    }

    /// Infers whether the select yields at most one row.
    fn set_singular(&self, field_name: &str, sel: &mut Select) {
        if sel.singular {
            return;
        }
        if self.config.enable_inflection {
            sel.singular = singularize(field_name) == field_name;
        }

        // A one-to-many link whose parent-side key is scalar pins the child
        // to a single row, as does a polymorphic link.
        if (sel.rel.rel_type == RelType::OneToMany && !sel.rel.right.col.array)
            || sel.rel.rel_type == RelType::Polymorphic
        {
            sel.singular = true;
            return;
        }
        let Some(last) = sel.joins.last() else {
            return;
        };
        if (last.rel_type == RelType::OneToMany && !last.right.col.array)
            || last.rel_type == RelType::Polymorphic
        {
            sel.singular = true;
        }
    }

    /// Classifies the field's sub-selections and enqueues child selects.
    fn compile_columns(
        &self,
        stack: &mut Vec<(i32, i32)>,
        op: &Operation,
        sel: &mut Select,
        field: &Field,
    ) -> Result<()> {
        let mut rel_children: Vec<i32> = Vec::new();
        let mut saw_agg = false;

        for &cid in &field.children {
            let f = &op.fields[cid as usize];
            if !f.children.is_empty() {
                rel_children.push(cid);
                continue;
            }
            match fns::classify(&f.name, self.schema.functions()) {
                FieldClass::Typename => sel.typename = true,
                FieldClass::Skip => {}
                FieldClass::Function(call) => {
                    if call.requires_search && !sel.arg_map.contains_key("search") {
                        return Err(CompileError::NoSearchArg(f.name.clone()));
                    }
                    saw_agg |= call.agg;
                    let func = self.build_function(sel, f, call)?;
                    sel.funcs.push(func);
                }
                FieldClass::Column => {
                    let col = sel.ti.get_column(&f.name)?;
                    sel.add_col(
                        Column {
                            col,
                            field_name: f.output_name().to_owned(),
                        },
                        false,
                    );
                }
            }
        }

        // Reversed push so children pop in declared order.
        for &cid in rel_children.iter().rev() {
            stack.push((cid, sel.id));
        }

        sel.group_cols = saw_agg && !sel.cols.is_empty();
        Ok(())
    }

    /// Resolves a recognised function selection against the schema: a local
    /// column argument, or a synthetic child select for a `table__column`
    /// cross-table aggregate.
    fn build_function(&self, sel: &Select, field: &Field, call: FuncCall) -> Result<Function> {
        let mut func = Function {
            name: call.name,
            col: None,
            sel: None,
            field_name: field.output_name().to_owned(),
        };
        if call.expr.is_empty() {
            return Ok(func);
        }

        let cross = call.expr.starts_with('_') || call.expr.contains("__");
        if !cross {
            func.col = Some(sel.ti.get_column(&call.expr)?);
            return Ok(func);
        }

        let expr = call.expr.trim_start_matches('_');
        let (tname, cname) = match expr.split_once("__") {
            Some((t, c)) => (t, Some(c)),
            None => (expr, None),
        };
        let table = self.schema.find(&self.config.db_schema, tname)?;
        let column = match cname {
            Some(c) => table.get_column(c)?,
            None => table
                .primary_col
                .clone()
                .ok_or_else(|| CompileError::NoPrimaryKey(table.name.clone()))?,
        };

        let mut paths = self
            .schema
            .find_path(&table.name, &sel.table, None)?
            .into_iter();
        let Some(first) = paths.next() else {
            return Err(CompileError::NoRelationship {
                child: table.name.clone(),
                parent: sel.table.clone(),
            });
        };

        let mut fsel = Select::new(-1, sel.id, "");
        fsel.table = table.name.clone();
        fsel.ti = table;
        fsel.add_col(
            Column {
                col: column,
                field_name: String::new(),
            },
            true,
        );
        fsel.rel = path_to_rel(first);
        fsel.joins = paths.map(path_to_rel).collect();

        func.sel = Some(Box::new(fsel));
        Ok(func)
    }

    fn validate_select(&self, sel: &Select) -> Result<()> {
        if sel.rel.rel_type == RelType::Recursive {
            match sel.arg_map.get("find") {
                None => return Err(CompileError::FindRequired),
                Some(v) if v.val != "parents" && v.val != "children" => {
                    return Err(CompileError::FindValues)
                }
                _ => {}
            }
        }
        Ok(())
    }
}
