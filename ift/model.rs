use crate::tree::{ItemTree, TreeError};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a fitted model when
// serialized to a TOML file. They mirror the tables produced by the upstream
// tree-fitting procedure one-to-one.

/// One internal node of an item's split tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    /// 1-based item the split belongs to.
    pub item: usize,
    /// Node id, unique within the item. The root is node 1.
    pub number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<u32>,
    /// Dataset column tested at this node.
    pub variable: String,
    /// Rows with `variable <= threshold` go left, the rest go right.
    pub threshold: f64,
}

/// Intercept of one subgroup (leaf) of a DIF item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafCoefficient {
    pub item: usize,
    pub node: u32,
    pub coefficient: f64,
}

/// Flat intercept of an item without DIF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoDifOffset {
    pub item: usize,
    pub offset: f64,
}

/// The raw tables of a fitted model, exactly as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTables {
    /// Slope on the total score for items `1..=slopes.len()`.
    pub slopes: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_labels: Option<Vec<String>>,
    #[serde(default)]
    pub dif_leaves: Vec<LeafCoefficient>,
    #[serde(default)]
    pub no_dif_offsets: Vec<NoDifOffset>,
    #[serde(default)]
    pub splits: Vec<SplitRecord>,
}

/// How an item's intercept is formed.
#[derive(Debug, Clone)]
pub enum ItemKind {
    /// Subgroup intercepts selected by the item's split tree.
    Dif(ItemTree),
    /// A single intercept shared by every record.
    NoDif { offset: f64 },
}

/// One validated item of the model.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    /// 1-based item number.
    pub number: usize,
    pub label: String,
    pub slope: f64,
    pub kind: ItemKind,
}

impl ItemSpec {
    pub fn is_dif(&self) -> bool {
        matches!(self.kind, ItemKind::Dif(_))
    }
}

/// A fitted item-focused tree model, validated once on construction and immutable
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ModelTables", into = "ModelTables")]
pub struct IftModel {
    tables: ModelTables,
    items: Vec<ItemSpec>,
}

/// Custom error type for model loading, saving, and validation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The model refers to item {item}, but only items 1..={num_items} have a slope.")]
    ItemOutOfRange { item: usize, num_items: usize },
    #[error("Item {0} has both DIF leaf coefficients and a no-DIF offset.")]
    ConflictingItem(usize),
    #[error("Item {0} has neither DIF leaf coefficients nor a no-DIF offset.")]
    MissingItemCoefficients(usize),
    #[error("Item {item} lists a coefficient for leaf {node} more than once.")]
    DuplicateLeaf { item: usize, node: u32 },
    #[error("Item {0} lists its no-DIF offset more than once.")]
    DuplicateOffset(usize),
    #[error("The model has {found} item labels but {expected} items.")]
    LabelCountMismatch { found: usize, expected: usize },
    #[error("Non-finite value found in {0}. All model parameters must be finite.")]
    NonFiniteValue(String),
    #[error("The split tree of item {item} is malformed: {source}")]
    InvalidTree {
        item: usize,
        #[source]
        source: TreeError,
    },
}

impl IftModel {
    /// Validates the raw tables and builds one tree per DIF item.
    pub fn new(tables: ModelTables) -> Result<Self, ModelError> {
        let items = internal::validate(&tables)?;
        Ok(Self { tables, items })
    }

    /// Items in ascending item order.
    pub fn items(&self) -> &[ItemSpec] {
        &self.items
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn tables(&self) -> &ModelTables {
        &self.tables
    }

    /// Every dataset column the DIF trees split on, in item order without repeats.
    pub fn split_variables(&self) -> Vec<&str> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        for item in &self.items {
            if let ItemKind::Dif(tree) = &item.kind {
                for variable in tree.variables() {
                    if seen.insert(variable) {
                        out.push(variable);
                    }
                }
            }
        }
        out
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(&self.tables)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let tables: ModelTables = toml::from_str(&toml_string)?;
        Self::new(tables)
    }
}

impl TryFrom<ModelTables> for IftModel {
    type Error = ModelError;

    fn try_from(tables: ModelTables) -> Result<Self, Self::Error> {
        Self::new(tables)
    }
}

impl From<IftModel> for ModelTables {
    fn from(model: IftModel) -> Self {
        model.tables
    }
}

/// Internal module for model validation.
mod internal {
    use super::*;

    pub(super) fn validate(tables: &ModelTables) -> Result<Vec<ItemSpec>, ModelError> {
        let num_items = tables.slopes.len();
        let in_range = |item: usize| -> Result<(), ModelError> {
            if item == 0 || item > num_items {
                return Err(ModelError::ItemOutOfRange { item, num_items });
            }
            Ok(())
        };
        let finite = |value: f64, what: String| -> Result<(), ModelError> {
            if !value.is_finite() {
                return Err(ModelError::NonFiniteValue(what));
            }
            Ok(())
        };

        for (i, &slope) in tables.slopes.iter().enumerate() {
            finite(slope, format!("the slope of item {}", i + 1))?;
        }

        if let Some(labels) = &tables.item_labels {
            if labels.len() != num_items {
                return Err(ModelError::LabelCountMismatch {
                    found: labels.len(),
                    expected: num_items,
                });
            }
        }

        let mut leaves: BTreeMap<usize, BTreeMap<u32, f64>> = BTreeMap::new();
        for leaf in &tables.dif_leaves {
            in_range(leaf.item)?;
            finite(
                leaf.coefficient,
                format!("leaf {} of item {}", leaf.node, leaf.item),
            )?;
            let item_leaves = leaves.entry(leaf.item).or_default();
            if item_leaves.insert(leaf.node, leaf.coefficient).is_some() {
                return Err(ModelError::DuplicateLeaf {
                    item: leaf.item,
                    node: leaf.node,
                });
            }
        }

        let mut offsets: BTreeMap<usize, f64> = BTreeMap::new();
        for entry in &tables.no_dif_offsets {
            in_range(entry.item)?;
            finite(entry.offset, format!("the no-DIF offset of item {}", entry.item))?;
            if offsets.insert(entry.item, entry.offset).is_some() {
                return Err(ModelError::DuplicateOffset(entry.item));
            }
        }

        let mut splits: BTreeMap<usize, Vec<SplitRecord>> = BTreeMap::new();
        for row in &tables.splits {
            in_range(row.item)?;
            finite(
                row.threshold,
                format!("the threshold of split {} of item {}", row.number, row.item),
            )?;
            splits.entry(row.item).or_default().push(row.clone());
        }

        let mut items = Vec::with_capacity(num_items);
        for (index, &slope) in tables.slopes.iter().enumerate() {
            let number = index + 1;
            let label = tables
                .item_labels
                .as_ref()
                .map(|labels| labels[index].clone())
                .unwrap_or_else(|| format!("item{number}"));

            let kind = match (leaves.remove(&number), offsets.get(&number)) {
                (Some(_), Some(_)) => return Err(ModelError::ConflictingItem(number)),
                (None, None) => return Err(ModelError::MissingItemCoefficients(number)),
                (Some(coefficients), None) => {
                    let item_splits = splits.remove(&number).unwrap_or_default();
                    let tree = ItemTree::new(item_splits, coefficients)
                        .map_err(|source| ModelError::InvalidTree { item: number, source })?;
                    log::debug!(
                        "Item {number}: {} leaves, depth {}",
                        tree.num_leaves(),
                        tree.depth()
                    );
                    ItemKind::Dif(tree)
                }
                (None, Some(&offset)) => {
                    if let Some(unused) = splits.remove(&number) {
                        log::warn!(
                            "Item {number} has no DIF coefficients; ignoring its {} split row(s).",
                            unused.len()
                        );
                    }
                    ItemKind::NoDif { offset }
                }
            };

            items.push(ItemSpec {
                number,
                label,
                slope,
                kind,
            });
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn split(item: usize, number: u32, left: u32, right: u32, variable: &str) -> SplitRecord {
        SplitRecord {
            item,
            number,
            left: Some(left),
            right: Some(right),
            variable: variable.to_string(),
            threshold: 30.0,
        }
    }

    fn leaf(item: usize, node: u32, coefficient: f64) -> LeafCoefficient {
        LeafCoefficient {
            item,
            node,
            coefficient,
        }
    }

    fn two_item_tables() -> ModelTables {
        ModelTables {
            slopes: vec![1.0, 0.8],
            item_labels: None,
            dif_leaves: vec![leaf(1, 2, 0.5), leaf(1, 3, -0.3)],
            no_dif_offsets: vec![NoDifOffset {
                item: 2,
                offset: 0.1,
            }],
            splits: vec![split(1, 1, 2, 3, "age")],
        }
    }

    #[test]
    fn validates_mixed_model() {
        let model = IftModel::new(two_item_tables()).unwrap();
        assert_eq!(model.num_items(), 2);
        assert!(model.items()[0].is_dif());
        assert!(!model.items()[1].is_dif());
        assert_eq!(model.items()[1].label, "item2");
        assert_eq!(model.split_variables(), vec!["age"]);
    }

    #[test]
    fn uses_supplied_item_labels() {
        let mut tables = two_item_tables();
        tables.item_labels = Some(vec!["q1".into(), "q2".into()]);
        let model = IftModel::new(tables).unwrap();
        assert_eq!(model.items()[0].label, "q1");
        assert_eq!(model.items()[1].label, "q2");
    }

    #[test]
    fn rejects_item_with_both_coefficient_sets() {
        let mut tables = two_item_tables();
        tables.no_dif_offsets.push(NoDifOffset {
            item: 1,
            offset: 0.0,
        });
        match IftModel::new(tables).unwrap_err() {
            ModelError::ConflictingItem(item) => assert_eq!(item, 1),
            other => panic!("Expected ConflictingItem, got {other:?}"),
        }
    }

    #[test]
    fn rejects_item_without_coefficients() {
        let mut tables = two_item_tables();
        tables.no_dif_offsets.clear();
        match IftModel::new(tables).unwrap_err() {
            ModelError::MissingItemCoefficients(item) => assert_eq!(item, 2),
            other => panic!("Expected MissingItemCoefficients, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_item() {
        let mut tables = two_item_tables();
        tables.dif_leaves.push(leaf(3, 1, 0.2));
        match IftModel::new(tables).unwrap_err() {
            ModelError::ItemOutOfRange { item, num_items } => {
                assert_eq!(item, 3);
                assert_eq!(num_items, 2);
            }
            other => panic!("Expected ItemOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn malformed_tree_names_the_item() {
        let mut tables = two_item_tables();
        tables.dif_leaves.retain(|l| l.node != 3);
        match IftModel::new(tables).unwrap_err() {
            ModelError::InvalidTree { item, source } => {
                assert_eq!(item, 1);
                assert_eq!(source, TreeError::SplitNotFound { node: 3 });
            }
            other => panic!("Expected InvalidTree, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let mut tables = two_item_tables();
        tables.splits[0].threshold = f64::NAN;
        assert!(matches!(
            IftModel::new(tables).unwrap_err(),
            ModelError::NonFiniteValue(_)
        ));
    }

    #[test]
    fn splits_of_no_dif_items_are_ignored() {
        let mut tables = two_item_tables();
        tables.splits.push(split(2, 1, 2, 3, "sex"));
        let model = IftModel::new(tables).unwrap();
        assert_eq!(model.split_variables(), vec!["age"]);
    }

    #[test]
    fn save_and_load_preserve_tables() {
        let model = IftModel::new(two_item_tables()).unwrap();
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        model.save(path).unwrap();
        let loaded = IftModel::load(path).unwrap();
        assert_eq!(loaded.tables(), model.tables());
    }

    #[test]
    fn parses_hand_written_toml() {
        let text = r#"
slopes = [1.0, 0.5]

[[dif_leaves]]
item = 2
node = 1
coefficient = -0.2

[[no_dif_offsets]]
item = 1
offset = 0.1
"#;
        let model: IftModel = toml::from_str(text).unwrap();
        assert_eq!(model.num_items(), 2);
        match &model.items()[1].kind {
            ItemKind::Dif(tree) => assert_eq!(tree.num_leaves(), 1),
            other => panic!("Expected a DIF item, got {other:?}"),
        }
    }
}
