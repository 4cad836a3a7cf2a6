//! Recognition backend wire types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizeResponse {
    #[serde(default)]
    pub result: Vec<RecognizedFace>,
}

impl RecognizeResponse {
    /// Top subject of the first detected face.
    pub fn best_subject(&self) -> Option<&SubjectMatch> {
        self.result.first()?.subjects.first()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognizedFace {
    #[serde(rename = "box")]
    pub face_box: Option<FaceBox>,
    #[serde(default)]
    pub subjects: Vec<SubjectMatch>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FaceBox {
    pub probability: f32,
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMatch {
    pub subject: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFaceResponse {
    pub image_id: String,
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSubjectResponse {
    #[serde(default)]
    pub deleted: u32,
}
