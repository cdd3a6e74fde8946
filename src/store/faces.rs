//! Faces and people.
//!
//! A face's `person_id` and the owning person's `face_ids` always agree:
//! every operation that changes one side rewrites both collections in the
//! same transaction.

use chrono::Utc;

use super::models::{new_id, FaceData, FacePatch, NewFace, Person};
use super::schema::{FACES_KEY, PERSONS_KEY};
use super::{Store, StoreError, StoreResult};

impl Store {
    // ========================================================================
    // Faces
    // ========================================================================

    pub fn faces(&self) -> StoreResult<Vec<FaceData>> {
        self.load(FACES_KEY)
    }

    pub fn face(&self, id: &str) -> StoreResult<Option<FaceData>> {
        Ok(self.faces()?.into_iter().find(|f| f.id == id))
    }

    pub fn faces_for_image(&self, image_id: &str) -> StoreResult<Vec<FaceData>> {
        Ok(self
            .faces()?
            .into_iter()
            .filter(|f| f.image_id == image_id)
            .collect())
    }

    pub fn faces_for_person(&self, person_id: &str) -> StoreResult<Vec<FaceData>> {
        Ok(self
            .faces()?
            .into_iter()
            .filter(|f| f.person_id.as_deref() == Some(person_id))
            .collect())
    }

    pub fn unassigned_faces(&self) -> StoreResult<Vec<FaceData>> {
        Ok(self
            .faces()?
            .into_iter()
            .filter(|f| f.person_id.is_none())
            .collect())
    }

    /// Store a detected face. The image it belongs to must exist.
    pub fn add_face(&self, face: NewFace) -> StoreResult<FaceData> {
        if self.image(&face.image_id)?.is_none() {
            return Err(StoreError::not_found("image", &face.image_id));
        }

        let face = FaceData {
            id: new_id("face"),
            image_id: face.image_id,
            bounding_box: face.bounding_box,
            confidence: face.confidence,
            person_id: None,
            estimated_age: face.estimated_age,
            estimated_gender: face.estimated_gender,
            detected_at: Utc::now(),
        };

        let mut faces = self.faces()?;
        faces.push(face.clone());
        self.save(FACES_KEY, &faces)?;
        Ok(face)
    }

    pub fn update_face(&self, id: &str, patch: FacePatch) -> StoreResult<FaceData> {
        let mut faces = self.faces()?;
        let face = faces
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::not_found("face", id))?;

        if let Some(bbox) = patch.bounding_box {
            face.bounding_box = bbox;
        }
        if let Some(confidence) = patch.confidence {
            face.confidence = confidence;
        }
        if let Some(age) = patch.estimated_age {
            face.estimated_age = Some(age);
        }
        if let Some(gender) = patch.estimated_gender {
            face.estimated_gender = Some(gender);
        }

        let updated = face.clone();
        self.save(FACES_KEY, &faces)?;
        Ok(updated)
    }

    /// Remove a face and drop it from its person.
    pub fn remove_face(&self, id: &str) -> StoreResult<bool> {
        self.remove_faces_where(|f| f.id == id).map(|n| n > 0)
    }

    /// Remove all faces detected in an image. Returns how many were removed.
    pub fn remove_faces_for_image(&self, image_id: &str) -> StoreResult<usize> {
        self.remove_faces_where(|f| f.image_id == image_id)
    }

    fn remove_faces_where<P>(&self, pred: P) -> StoreResult<usize>
    where
        P: Fn(&FaceData) -> bool,
    {
        let mut faces = self.faces()?;
        let removed: Vec<String> = faces.iter().filter(|f| pred(f)).map(|f| f.id.clone()).collect();
        if removed.is_empty() {
            return Ok(0);
        }
        faces.retain(|f| !pred(f));

        let mut persons = self.persons()?;
        let now = Utc::now();
        for person in persons.iter_mut() {
            let count = person.face_ids.len();
            person.face_ids.retain(|fid| !removed.contains(fid));
            if person.face_ids.len() != count {
                person.updated_at = now;
            }
        }

        self.commit(vec![
            (FACES_KEY, Some(Self::encode(&faces)?)),
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
        ])?;
        Ok(removed.len())
    }

    // ========================================================================
    // People
    // ========================================================================

    pub fn persons(&self) -> StoreResult<Vec<Person>> {
        self.load(PERSONS_KEY)
    }

    pub fn person(&self, id: &str) -> StoreResult<Option<Person>> {
        Ok(self.persons()?.into_iter().find(|p| p.id == id))
    }

    /// Find a person by name (case-insensitive)
    pub fn find_person_by_name(&self, name: &str) -> StoreResult<Option<Person>> {
        let name = name.trim().to_lowercase();
        Ok(self
            .persons()?
            .into_iter()
            .find(|p| p.name.to_lowercase() == name))
    }

    pub fn create_person(&self, name: &str) -> StoreResult<Person> {
        let now = Utc::now();
        let person = Person {
            id: new_id("person"),
            name: name.trim().to_string(),
            face_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let mut persons = self.persons()?;
        persons.push(person.clone());
        self.save(PERSONS_KEY, &persons)?;
        Ok(person)
    }

    pub fn rename_person(&self, id: &str, name: &str) -> StoreResult<Person> {
        let mut persons = self.persons()?;
        let person = persons
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::not_found("person", id))?;
        person.name = name.trim().to_string();
        person.updated_at = Utc::now();

        let updated = person.clone();
        self.save(PERSONS_KEY, &persons)?;
        Ok(updated)
    }

    /// Delete a person. Every face pointing at them becomes unassigned; no
    /// face is deleted. Returns whether the person existed.
    pub fn delete_person(&self, id: &str) -> StoreResult<bool> {
        let mut persons = self.persons()?;
        let before = persons.len();
        persons.retain(|p| p.id != id);
        let existed = persons.len() != before;

        let mut faces = self.faces()?;
        for face in faces.iter_mut() {
            if face.person_id.as_deref() == Some(id) {
                face.person_id = None;
            }
        }

        self.commit(vec![
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
            (FACES_KEY, Some(Self::encode(&faces)?)),
        ])?;
        Ok(existed)
    }

    /// Link a face to a person, moving it away from any previous owner.
    /// Fails with `NotFound` and changes nothing if either record is missing.
    pub fn assign_face_to_person(&self, face_id: &str, person_id: &str) -> StoreResult<()> {
        let mut faces = self.faces()?;
        let mut persons = self.persons()?;

        let face = faces
            .iter_mut()
            .find(|f| f.id == face_id)
            .ok_or_else(|| StoreError::not_found("face", face_id))?;
        if !persons.iter().any(|p| p.id == person_id) {
            return Err(StoreError::not_found("person", person_id));
        }

        face.person_id = Some(person_id.to_string());

        let now = Utc::now();
        for person in persons.iter_mut() {
            if person.id == person_id {
                if !person.face_ids.iter().any(|fid| fid == face_id) {
                    person.face_ids.push(face_id.to_string());
                    person.updated_at = now;
                }
            } else if person.face_ids.iter().any(|fid| fid == face_id) {
                person.face_ids.retain(|fid| fid != face_id);
                person.updated_at = now;
            }
        }

        self.commit(vec![
            (FACES_KEY, Some(Self::encode(&faces)?)),
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
        ])
    }

    /// Unlink a face from whichever person owns it. A face that is already
    /// unassigned is left alone.
    pub fn unassign_face_from_person(&self, face_id: &str) -> StoreResult<()> {
        let mut faces = self.faces()?;
        let face = faces
            .iter_mut()
            .find(|f| f.id == face_id)
            .ok_or_else(|| StoreError::not_found("face", face_id))?;
        face.person_id = None;

        let mut persons = self.persons()?;
        let now = Utc::now();
        for person in persons.iter_mut() {
            if person.face_ids.iter().any(|fid| fid == face_id) {
                person.face_ids.retain(|fid| fid != face_id);
                person.updated_at = now;
            }
        }

        self.commit(vec![
            (FACES_KEY, Some(Self::encode(&faces)?)),
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
        ])
    }

    pub fn clear_face_data(&self) -> StoreResult<()> {
        self.commit(vec![(FACES_KEY, None), (PERSONS_KEY, None)])
    }
}
