//! In-process known-person registry.
//!
//! Embeddings are L2-normalised into one dense matrix so a lookup is a
//! single matrix-vector product. The matrix is rebuilt wholesale on every
//! change, which is fine for registries of a few hundred people.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use tracing::{debug, info, warn};
use vigil_models::MatchResult;

use crate::error::{RecognitionError, RecognitionResult};

const NORM_FLOOR: f32 = 1e-10;

/// A registered person and their reference embeddings.
#[derive(Debug, Clone)]
pub struct PersonFeatures {
    pub person_id: i64,
    pub name: String,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl PersonFeatures {
    pub fn new(person_id: i64, name: impl Into<String>, embeddings: Vec<Vec<f32>>) -> Self {
        Self {
            person_id,
            name: name.into(),
            group_id: None,
            group_name: None,
            embeddings,
            created_at: Utc::now(),
        }
    }

    pub fn with_group(mut self, group_id: i64, group_name: impl Into<String>) -> Self {
        self.group_id = Some(group_id);
        self.group_name = Some(group_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub person_count: usize,
    pub embedding_count: usize,
    pub similarity_threshold: f32,
}

#[derive(Debug)]
struct Index {
    /// One normalised embedding per row
    matrix: Array2<f32>,
    /// Person id for each row
    owners: Vec<i64>,
}

#[derive(Debug)]
struct Registry {
    persons: BTreeMap<i64, PersonFeatures>,
    index: Option<Index>,
    threshold: f32,
}

impl Registry {
    fn dimension(&self) -> Option<usize> {
        self.index.as_ref().map(|index| index.matrix.ncols())
    }

    fn rebuild(&mut self) -> RecognitionResult<()> {
        let mut owners = Vec::new();
        let mut flat = Vec::new();
        let mut dim = None;

        for person in self.persons.values() {
            for embedding in &person.embeddings {
                match dim {
                    None => dim = Some(embedding.len()),
                    Some(d) if d != embedding.len() => {
                        return Err(RecognitionError::Embedding(format!(
                            "person {} has a {}-d embedding, registry is {}-d",
                            person.person_id,
                            embedding.len(),
                            d
                        )));
                    }
                    Some(_) => {}
                }
                flat.extend_from_slice(embedding);
                owners.push(person.person_id);
            }
        }

        self.index = match dim {
            Some(d) if !owners.is_empty() => {
                let mut matrix = Array2::from_shape_vec((owners.len(), d), flat)
                    .map_err(|e| RecognitionError::Embedding(e.to_string()))?;
                for mut row in matrix.rows_mut() {
                    let norm = row.dot(&row).sqrt().max(NORM_FLOOR);
                    row.mapv_inplace(|v| v / norm);
                }
                Some(Index { matrix, owners })
            }
            _ => None,
        };
        Ok(())
    }
}

/// Thread-safe registry of known faces.
#[derive(Debug)]
pub struct FaceDatabase {
    registry: RwLock<Registry>,
}

impl FaceDatabase {
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            registry: RwLock::new(Registry {
                persons: BTreeMap::new(),
                index: None,
                threshold: similarity_threshold,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.read().threshold
    }

    pub fn set_similarity_threshold(&self, threshold: f32) {
        self.write().threshold = threshold;
    }

    /// Add or replace a person. A person without embeddings is rejected,
    /// as is one whose embedding size differs from the registry's.
    pub fn add_person(&self, person: PersonFeatures) -> RecognitionResult<()> {
        if person.embeddings.is_empty() {
            warn!(person_id = person.person_id, "Person has no embeddings, skipping");
            return Err(RecognitionError::InvalidInput(format!(
                "person {} has no embeddings",
                person.person_id
            )));
        }

        let mut registry = self.write();
        let person_id = person.person_id;
        let previous = registry.persons.insert(person_id, person);
        if let Err(e) = registry.rebuild() {
            match previous {
                Some(old) => registry.persons.insert(person_id, old),
                None => registry.persons.remove(&person_id),
            };
            registry.rebuild()?;
            return Err(e);
        }
        debug!(person_id, "Person added to face registry");
        Ok(())
    }

    /// Remove a person and rebuild the index. Returns `Ok(false)` when the person is unknown.
    pub fn remove_person(&self, person_id: i64) -> RecognitionResult<bool> {
        let mut registry = self.write();
        if registry.persons.remove(&person_id).is_none() {
            return Ok(false);
        }
        registry.rebuild()?;
        debug!(person_id, "Person removed from face registry");
        Ok(true)
    }

    /// Replace a registered person's embeddings. Returns `Ok(false)` when the person is unknown.
    pub fn update_embeddings(&self, person_id: i64, embeddings: Vec<Vec<f32>>) -> RecognitionResult<bool> {
        let Some(mut person) = self.get_person(person_id) else {
            return Ok(false);
        };
        person.embeddings = embeddings;
        self.add_person(person)?;
        Ok(true)
    }

    pub fn clear(&self) {
        let mut registry = self.write();
        registry.persons.clear();
        registry.index = None;
        info!("Face registry cleared");
    }

    /// Match one embedding. Ties go to the first registered row.
    pub fn recognize(&self, embedding: &[f32]) -> MatchResult {
        let registry = self.read();
        let Some(index) = &registry.index else {
            return MatchResult::stranger(0.0);
        };
        if registry.dimension() != Some(embedding.len()) {
            warn!(
                expected = index.matrix.ncols(),
                got = embedding.len(),
                "Embedding size mismatch, treating as stranger"
            );
            return MatchResult::stranger(0.0);
        }

        let query = ArrayView1::from(embedding);
        let norm = query.dot(&query).sqrt().max(NORM_FLOOR);
        let similarities = index.matrix.dot(&query) / norm;

        let mut best: Option<(usize, f32)> = None;
        for (row, &similarity) in similarities.iter().enumerate() {
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((row, similarity));
            }
        }
        let Some((row, similarity)) = best else {
            return MatchResult::stranger(0.0);
        };

        if similarity < registry.threshold {
            return MatchResult::stranger(similarity);
        }

        match registry.persons.get(&index.owners[row]) {
            Some(person) => MatchResult::known(
                Some(person.person_id),
                person.name.clone(),
                person.group_id,
                person.group_name.clone(),
                similarity,
            ),
            None => MatchResult::stranger(similarity),
        }
    }

    pub fn recognize_batch(&self, embeddings: &[Vec<f32>]) -> Vec<MatchResult> {
        embeddings.iter().map(|e| self.recognize(e)).collect()
    }

    pub fn get_person(&self, person_id: i64) -> Option<PersonFeatures> {
        self.read().persons.get(&person_id).cloned()
    }

    pub fn list_persons(&self) -> Vec<PersonFeatures> {
        self.read().persons.values().cloned().collect()
    }

    pub fn stats(&self) -> DatabaseStats {
        let registry = self.read();
        DatabaseStats {
            person_count: registry.persons.len(),
            embedding_count: registry.index.as_ref().map_or(0, |i| i.owners.len()),
            similarity_threshold: registry.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> FaceDatabase {
        let db = FaceDatabase::new(0.8);
        db.add_person(PersonFeatures::new(1, "alice", vec![vec![1.0, 0.0, 0.0]]))
            .unwrap();
        db.add_person(
            PersonFeatures::new(2, "bob", vec![vec![0.0, 2.0, 0.0], vec![0.0, 1.0, 1.0]])
                .with_group(10, "staff"),
        )
        .unwrap();
        db
    }

    #[test]
    fn test_empty_registry_is_stranger() {
        let db = FaceDatabase::new(0.5);
        let result = db.recognize(&[1.0, 0.0]);
        assert!(result.is_stranger);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn test_recognize_known_person() {
        let result = db().recognize(&[0.0, 3.0, 0.1]);
        assert!(!result.is_stranger);
        assert_eq!(result.person_id, Some(2));
        assert_eq!(result.group_name.as_deref(), Some("staff"));
        assert!(result.similarity > 0.99);
    }

    #[test]
    fn test_below_threshold_is_stranger() {
        let result = db().recognize(&[1.0, 1.0, 0.0]);
        assert!(result.is_stranger);
        assert!((result.similarity - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn test_tie_goes_to_first_row() {
        let db = FaceDatabase::new(0.5);
        db.add_person(PersonFeatures::new(5, "first", vec![vec![1.0, 0.0]])).unwrap();
        db.add_person(PersonFeatures::new(6, "second", vec![vec![2.0, 0.0]])).unwrap();
        assert_eq!(db.recognize(&[1.0, 0.0]).person_id, Some(5));
    }

    #[test]
    fn test_add_without_embeddings_rejected() {
        let db = FaceDatabase::new(0.5);
        assert!(db.add_person(PersonFeatures::new(1, "x", vec![])).is_err());
        assert_eq!(db.stats().person_count, 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let db = db();
        assert!(db
            .add_person(PersonFeatures::new(3, "carol", vec![vec![1.0, 0.0]]))
            .is_err());
        assert!(db.get_person(3).is_none());
        assert_eq!(db.stats().embedding_count, 3);

        assert!(db.recognize(&[1.0, 0.0]).is_stranger);
    }

    #[test]
    fn test_maintenance() {
        let db = db();
        assert_eq!(
            db.stats(),
            DatabaseStats {
                person_count: 2,
                embedding_count: 3,
                similarity_threshold: 0.8
            }
        );

        assert!(db.update_embeddings(1, vec![vec![0.0, 0.0, 1.0]]).unwrap());
        assert_eq!(db.recognize(&[0.0, 0.0, 1.0]).person_id, Some(1));
        assert!(!db.update_embeddings(99, vec![vec![1.0, 0.0, 0.0]]).unwrap());

        assert!(db.remove_person(2).unwrap());
        assert!(!db.remove_person(2).unwrap());
        assert_eq!(db.list_persons().len(), 1);

        db.set_similarity_threshold(0.99);
        assert!(db.recognize(&[0.0, 0.3, 1.0]).is_stranger);

        db.clear();
        assert!(db.recognize(&[0.0, 0.0, 1.0]).is_stranger);
        assert_eq!(
            db.recognize_batch(&[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).len(),
            2
        );
    }

    #[test]
    fn test_remove_rebuilds_index() {
        let db = FaceDatabase::new(0.8);
        db.add_person(PersonFeatures::new(4, "dana", vec![vec![1.0, 0.0]])).unwrap();
        assert_eq!(db.recognize(&[1.0, 0.0]).person_id, Some(4));

        assert!(db.remove_person(4).unwrap());
        assert!(db.recognize(&[1.0, 0.0]).is_stranger);
        assert_eq!(db.stats().embedding_count, 0);
    }
}
