use crate::{
    db::{
        entity::{Entity, Record},
        layout::{LayoutTree, LazyLoadState, LoadOutcome, ManyProperty, ReadContext},
    },
    error::InternalError,
};

///
/// Relation
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Relation {
    One,
    Many,
}

///
/// ChildSpec
///

#[derive(Clone, Debug)]
struct ChildSpec {
    property: String,
    relation: Relation,
    node: NodeSpec,
}

///
/// NodeSpec
///
/// Column block of one node: identity column, scalar property columns, then
/// each child block in declaration order.
///

#[derive(Clone, Debug)]
pub struct NodeSpec {
    entity: String,
    properties: Vec<String>,
    children: Vec<ChildSpec>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(name.into());
        self
    }

    #[must_use]
    pub fn one(self, property: impl Into<String>, node: Self) -> Self {
        self.child(property.into(), Relation::One, node)
    }

    #[must_use]
    pub fn many(self, property: impl Into<String>, node: Self) -> Self {
        self.child(property.into(), Relation::Many, node)
    }

    fn child(mut self, property: String, relation: Relation, node: Self) -> Self {
        self.children.push(ChildSpec {
            property,
            relation,
            node,
        });
        self
    }

    /// Columns this node and its descendants occupy in a row.
    #[must_use]
    pub fn column_count(&self) -> usize {
        1 + self.properties.len()
            + self
                .children
                .iter()
                .map(|child| child.node.column_count())
                .sum::<usize>()
    }

    fn many_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| usize::from(child.relation == Relation::Many) + child.node.many_count())
            .sum()
    }

    fn summary(&self, out: &mut String) {
        out.push_str(&self.entity);
        out.push('(');
        out.push_str(&self.properties.join(","));
        for child in &self.children {
            let marker = match child.relation {
                Relation::One => '>',
                Relation::Many => '*',
            };
            out.push(' ');
            out.push(marker);
            out.push_str(&child.property);
            out.push(':');
            child.node.summary(out);
        }
        out.push(')');
    }
}

///
/// SqlTree
///
/// Layout tree over [`Record`] entities. Supports nested one-to-one nodes and
/// a single many node directly under the root.
///

#[derive(Clone, Debug)]
pub struct SqlTree {
    root: NodeSpec,
    many: Option<ManyProperty>,
    row_number_included: bool,
    lazy_parent_column: bool,
}

impl SqlTree {
    pub fn new(root: NodeSpec) -> Result<Self, InternalError> {
        let total_many = root.many_count();
        let direct: Vec<&ChildSpec> = root
            .children
            .iter()
            .filter(|child| child.relation == Relation::Many)
            .collect();

        if total_many > 1 {
            return Err(InternalError::layout_unsupported(format!(
                "layout for {} has {total_many} many relationships; at most one is supported",
                root.entity
            )));
        }
        if total_many != direct.len() {
            return Err(InternalError::layout_unsupported(format!(
                "many relationship in layout for {} must be a direct child of the root",
                root.entity
            )));
        }

        let many = direct.first().map(|child| ManyProperty {
            name: child.property.clone(),
            target_entity: child.node.entity.clone(),
        });

        Ok(Self {
            root,
            many,
            row_number_included: false,
            lazy_parent_column: false,
        })
    }

    /// Rows start with a synthetic row-number column.
    #[must_use]
    pub const fn with_row_number(mut self) -> Self {
        self.row_number_included = true;
        self
    }

    /// Rows carry the lazy-load parent id ahead of the root block.
    #[must_use]
    pub const fn with_lazy_parent_column(mut self) -> Self {
        self.lazy_parent_column = true;
        self
    }

    /// Total business columns per row (excludes the row-number column).
    #[must_use]
    pub fn column_count(&self) -> usize {
        usize::from(self.lazy_parent_column) + self.root.column_count()
    }

    fn read_properties(
        ctx: &mut ReadContext<'_>,
        node: &NodeSpec,
        record: &mut Record,
    ) -> Result<(), InternalError> {
        for name in &node.properties {
            let value = ctx.read()?;
            record.set_field(name.as_str(), value);
        }

        Ok(())
    }

    /// Read one nested node block. A null identity means the outer join found
    /// no row: the rest of the block is skipped.
    fn read_node(
        ctx: &mut ReadContext<'_>,
        node: &NodeSpec,
        path: &str,
    ) -> Result<Option<Record>, InternalError> {
        let id = ctx.read()?;
        if id.is_null() {
            ctx.skip(node.column_count() - 1);
            return Ok(None);
        }

        let mut record = Record::new(node.entity.as_str(), id);
        Self::read_properties(ctx, node, &mut record)?;

        for child in &node.children {
            if child.relation == Relation::Many {
                return Err(InternalError::layout_invariant(format!(
                    "nested many relationship {path}.{} reached while loading",
                    child.property
                )));
            }
            let child_path = format!("{path}.{}", child.property);
            if let Some(loaded) = Self::read_node(ctx, &child.node, &child_path)? {
                record.set_one(child.property.as_str(), loaded);
            }
        }

        ctx.record_node_usage(path);

        Ok(Some(record))
    }
}

impl LayoutTree for SqlTree {
    type Entity = Record;

    fn load(
        &self,
        ctx: &mut ReadContext<'_>,
        current: Option<&mut Record>,
    ) -> Result<LoadOutcome<Record>, InternalError> {
        let parent_id = if self.lazy_parent_column {
            Some(ctx.read()?)
        } else {
            None
        };

        let id = ctx.read()?;
        if id.is_null() {
            return Err(InternalError::layout_invariant(format!(
                "root identity column of {} is null",
                self.root.entity
            )));
        }

        let current = current.filter(|current| self.many.is_some() && *current.identity() == id);

        if let Some(current) = current {
            ctx.skip(self.root.properties.len());
            for child in &self.root.children {
                match child.relation {
                    Relation::One => ctx.skip(child.node.column_count()),
                    Relation::Many => {
                        if let Some(element) = Self::read_node(ctx, &child.node, &child.property)? {
                            current.push_many(&child.property, element);
                        }
                    }
                }
            }

            return Ok(LoadOutcome::Continued);
        }

        let mut record = Record::new(self.root.entity.as_str(), id);
        Self::read_properties(ctx, &self.root, &mut record)?;

        for child in &self.root.children {
            let loaded = Self::read_node(ctx, &child.node, &child.property)?;
            match child.relation {
                Relation::One => {
                    if let Some(loaded) = loaded {
                        record.set_one(child.property.as_str(), loaded);
                    }
                }
                Relation::Many => {
                    record.init_many(&child.property);
                    if let Some(element) = loaded {
                        record.push_many(&child.property, element);
                    }
                }
            }
        }

        if let Some(parent_id) = parent_id {
            ctx.set_lazy_loaded_parent(&parent_id)?;
        }

        Ok(LoadOutcome::Started(record))
    }

    fn complete(
        &self,
        entity: &Record,
        lazy: Option<&mut LazyLoadState>,
    ) -> Result<(), InternalError> {
        if let Some(lazy) = lazy {
            lazy.attach_completed(entity);
        }

        Ok(())
    }

    fn many_property(&self) -> Option<&ManyProperty> {
        self.many.as_ref()
    }

    fn row_number_included(&self) -> bool {
        self.row_number_included
    }

    fn summary(&self) -> String {
        let mut out = String::new();
        if self.row_number_included {
            out.push_str("rn ");
        }
        if self.lazy_parent_column {
            out.push_str("parent ");
        }
        self.root.summary(&mut out);
        out
    }
}
