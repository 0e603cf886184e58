//! Entity schema: attributes, relationships, inheritance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors found while validating a model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("entity {entity}: parent {parent} is not defined")]
    UnknownParent { entity: String, parent: String },

    #[error("entity {entity}: inheritance cycle")]
    InheritanceCycle { entity: String },

    #[error("relationship {entity}.{relationship}: target {target} is not defined")]
    UnknownTarget {
        entity: String,
        relationship: String,
        target: String,
    },

    #[error("relationship {entity}.{relationship}: inverse {inverse} is not defined on {target}")]
    UnknownInverse {
        entity: String,
        relationship: String,
        target: String,
        inverse: String,
    },

    #[error("entity {entity}: {name} is declared as both attribute and relationship")]
    DuplicateField { entity: String, name: String },

    #[error("model parse error: {0}")]
    Parse(String),
}

/// Scalar attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Json,
}

/// Relationship cardinality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    #[default]
    ToOne,
    ToMany,
}

/// A relationship from one entity to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Filled from the map key when loaded from a model file
    #[serde(default)]
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub inverse: Option<String>,
}

impl RelationshipDescriptor {
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// Schema description of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Filled from the map key when loaded from a model file
    #[serde(default)]
    pub name: String,
    /// Parent entity; attributes and relationships are inherited
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeType>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    pub fn with_to_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.with_relationship(name, target, Cardinality::ToOne, inverse)
    }

    pub fn with_to_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: Option<&str>,
    ) -> Self {
        self.with_relationship(name, target, Cardinality::ToMany, inverse)
    }

    fn with_relationship(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        inverse: Option<&str>,
    ) -> Self {
        let name = name.into();
        self.relationships.insert(
            name.clone(),
            RelationshipDescriptor {
                name,
                target: target.into(),
                cardinality,
                inverse: inverse.map(str::to_string),
            },
        );
        self
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.get(name)
    }
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    entities: BTreeMap<String, EntityDescriptor>,
}

/// A validated set of entities
///
/// Inherited attributes and relationships are flattened into each
/// sub-entity at construction, so lookups never walk the parent chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Model {
    entities: BTreeMap<String, EntityDescriptor>,
}

impl Model {
    pub fn new(entities: impl IntoIterator<Item = EntityDescriptor>) -> Result<Self, SchemaError> {
        let entities = entities
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect::<BTreeMap<_, _>>();
        Self::from_map(entities)
    }

    /// Build from a name-keyed map, filling in descriptor names from the keys.
    pub fn from_map(mut entities: BTreeMap<String, EntityDescriptor>) -> Result<Self, SchemaError> {
        for (name, entity) in entities.iter_mut() {
            entity.name = name.clone();
            for (rel_name, rel) in entity.relationships.iter_mut() {
                rel.name = rel_name.clone();
            }
        }

        let raw = entities.clone();
        for (name, entity) in entities.iter_mut() {
            // Flatten ancestors, nearest parent last so overrides win.
            let mut chain = Vec::new();
            let mut cursor = entity.parent.clone();
            while let Some(parent) = cursor {
                if parent == *name || chain.contains(&parent) {
                    return Err(SchemaError::InheritanceCycle {
                        entity: name.clone(),
                    });
                }
                let ancestor = raw.get(&parent).ok_or_else(|| SchemaError::UnknownParent {
                    entity: name.clone(),
                    parent: parent.clone(),
                })?;
                cursor = ancestor.parent.clone();
                chain.push(parent);
            }
            for ancestor in chain.iter().rev().filter_map(|p| raw.get(p)) {
                for (attr, kind) in &ancestor.attributes {
                    entity.attributes.entry(attr.clone()).or_insert(*kind);
                }
                for (rel_name, rel) in &ancestor.relationships {
                    entity
                        .relationships
                        .entry(rel_name.clone())
                        .or_insert_with(|| rel.clone());
                }
            }
        }

        for entity in entities.values() {
            for attr in entity.attributes.keys() {
                if entity.relationships.contains_key(attr) {
                    return Err(SchemaError::DuplicateField {
                        entity: entity.name.clone(),
                        name: attr.clone(),
                    });
                }
            }
            for rel in entity.relationships.values() {
                let target = entities.get(&rel.target).ok_or_else(|| SchemaError::UnknownTarget {
                    entity: entity.name.clone(),
                    relationship: rel.name.clone(),
                    target: rel.target.clone(),
                })?;
                if let Some(inverse) = &rel.inverse {
                    if !target.relationships.contains_key(inverse) {
                        return Err(SchemaError::UnknownInverse {
                            entity: entity.name.clone(),
                            relationship: rel.name.clone(),
                            target: rel.target.clone(),
                            inverse: inverse.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { entities })
    }

    /// Parse a YAML model of the form `entities: { Name: { attributes, relationships } }`.
    pub fn from_yaml(source: &str) -> Result<Self, SchemaError> {
        let file: ModelFile =
            serde_yaml::from_str(source).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_map(file.entities)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }

    /// Root of the inheritance chain; identity keys are scoped to it.
    pub fn root_of<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        while let Some(parent) = self.entities.get(current).and_then(|e| e.parent.as_deref()) {
            current = parent;
        }
        current
    }

    /// True if `entity` is `ancestor` or inherits from it.
    pub fn is_kind_of(&self, entity: &str, ancestor: &str) -> bool {
        let mut current = Some(entity);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.entities.get(name).and_then(|e| e.parent.as_deref());
        }
        false
    }

    /// Two entities may share an identifier if one inherits from the other.
    pub fn are_compatible(&self, a: &str, b: &str) -> bool {
        self.is_kind_of(a, b) || self.is_kind_of(b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog() -> Model {
        Model::new(vec![
            EntityDescriptor::new("Post")
                .with_attribute("title", AttributeType::String)
                .with_to_many("comments", "Comment", Some("post")),
            EntityDescriptor::new("Comment")
                .with_attribute("body", AttributeType::String)
                .with_to_one("post", "Post", Some("comments")),
        ])
        .unwrap()
    }

    #[test]
    fn model_resolves_relationships() {
        let model = blog();
        let post = model.entity("Post").unwrap();
        let comments = post.relationship("comments").unwrap();
        assert!(comments.is_to_many());
        assert_eq!(comments.target, "Comment");
        assert_eq!(comments.inverse.as_deref(), Some("post"));
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = Model::new(vec![
            EntityDescriptor::new("Post").with_to_one("author", "User", None),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTarget { .. }));
    }

    #[test]
    fn unknown_inverse_is_rejected() {
        let err = Model::new(vec![
            EntityDescriptor::new("Post").with_to_many("comments", "Comment", Some("article")),
            EntityDescriptor::new("Comment"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownInverse { .. }));
    }

    #[test]
    fn inheritance_flattens_fields() {
        let model = Model::new(vec![
            EntityDescriptor::new("Media").with_attribute("url", AttributeType::String),
            EntityDescriptor::new("Photo")
                .with_parent("Media")
                .with_attribute("width", AttributeType::Integer),
            EntityDescriptor::new("Video").with_parent("Media"),
        ])
        .unwrap();

        let photo = model.entity("Photo").unwrap();
        assert_eq!(photo.attribute("url"), Some(AttributeType::String));
        assert_eq!(model.root_of("Photo"), "Media");
        assert!(model.is_kind_of("Photo", "Media"));
        assert!(!model.is_kind_of("Media", "Photo"));
        assert!(model.are_compatible("Media", "Photo"));
        assert!(!model.are_compatible("Photo", "Video"));
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let err = Model::new(vec![
            EntityDescriptor::new("A").with_parent("B"),
            EntityDescriptor::new("B").with_parent("A"),
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::InheritanceCycle { .. }));
    }

    #[test]
    fn model_from_yaml() {
        let yaml = r#"
entities:
  Post:
    attributes:
      title: string
      published_at: date
    relationships:
      comments: { target: Comment, cardinality: to-many, inverse: post }
  Comment:
    attributes:
      body: string
    relationships:
      post: { target: Post, inverse: comments }
"#;
        let model = Model::from_yaml(yaml).unwrap();
        let post = model.entity("Post").unwrap();
        assert_eq!(post.name, "Post");
        assert_eq!(post.attribute("published_at"), Some(AttributeType::Date));
        let rel = post.relationship("comments").unwrap();
        assert_eq!(rel.name, "comments");
        assert!(rel.is_to_many());
        assert!(!model.entity("Comment").unwrap().relationship("post").unwrap().is_to_many());
    }
}
