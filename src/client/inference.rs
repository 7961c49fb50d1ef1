//! Request bodies for inference smoke tests.
//!
//! Token ids are fixed per model family; the large variant cycles the same
//! sequence out to [`LARGE_SEQUENCE_LEN`] tokens.

use serde::Serialize;

use crate::results::InferenceSize;

pub const LARGE_SEQUENCE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Gpt2,
    Bert,
    Roberta,
    T5,
    Generic,
}

impl ModelFamily {
    /// Family from the short model name used for registration.
    pub fn from_name(name: &str) -> Self {
        match name {
            "gpt2" => Self::Gpt2,
            "bert" => Self::Bert,
            "roberta" => Self::Roberta,
            "t5" => Self::T5,
            _ => Self::Generic,
        }
    }

    fn base_tokens(&self) -> &'static [i64] {
        match self {
            Self::Gpt2 => &[15496, 11, 337, 43, 48, 2640, 0],
            Self::Bert => &[101, 7592, 2088, 102],
            Self::Roberta => &[0, 31414, 232, 328, 2],
            Self::T5 => &[37, 1962, 10],
            Self::Generic => &[1, 2, 3],
        }
    }

    pub fn input_ids(&self, size: InferenceSize) -> Vec<i64> {
        match (self, size) {
            (_, InferenceSize::Small) => self.base_tokens().to_vec(),
            (Self::Generic, InferenceSize::Large) => (1..=LARGE_SEQUENCE_LEN as i64).collect(),
            (_, InferenceSize::Large) => self
                .base_tokens()
                .iter()
                .copied()
                .cycle()
                .take(LARGE_SEQUENCE_LEN)
                .collect(),
        }
    }
}

/// JSON body of `POST /models/{id}/inference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InferenceInput {
    pub input_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention_mask: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type_ids: Option<Vec<i64>>,
}

impl InferenceInput {
    pub fn for_model(name: &str, size: InferenceSize) -> Self {
        let family = ModelFamily::from_name(name);
        let input_ids = family.input_ids(size);
        if family == ModelFamily::Bert {
            let len = input_ids.len();
            return Self {
                input_ids,
                attention_mask: Some(vec![1; len]),
                token_type_ids: Some(vec![0; len]),
            };
        }
        Self {
            input_ids,
            attention_mask: None,
            token_type_ids: None,
        }
    }
}
