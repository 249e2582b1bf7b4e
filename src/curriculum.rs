//! # Curriculum
//!
//! The read-only lesson tree: parts, their chapters, and each chapter's content
//! items. The book ships embedded in the binary (`curriculum/book.yaml`) and is
//! shared as `Arc<Curriculum>`; nothing mutates it after loading.
//!
//! Content items serialize with a `type` tag, the same shape the assistant's
//! system directive embeds as JSON:
//!
//! ```json
//! {"type":"notation","data":{"abcString":"X:1\nK:C\nC D E F"},"caption":"A scale."}
//! ```

use crate::error::CurriculumError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const BOOK: &str = include_str!("../curriculum/book.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalloutKind {
    Note,
    Tip,
    Warning,
    Definition,
}

impl CalloutKind {
    pub fn title(self) -> &'static str {
        match self {
            CalloutKind::Note => "Note",
            CalloutKind::Tip => "Tip",
            CalloutKind::Warning => "Warning",
            CalloutKind::Definition => "Definition",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            CalloutKind::Note => "💡",
            CalloutKind::Tip => "👍",
            CalloutKind::Warning => "⚠️",
            CalloutKind::Definition => "📖",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotationData {
    #[serde(rename = "abcString")]
    pub abc_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Heading1 {
        text: String,
    },
    Heading2 {
        text: String,
    },
    Paragraph {
        text: String,
    },
    List {
        items: Vec<String>,
    },
    Callout {
        kind: CalloutKind,
        content: String,
    },
    Notation {
        data: NotationData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Image {
        prompt: String,
        caption: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

impl Chapter {
    /// Score sources of the chapter's notation items, in order.
    pub fn notations(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::Notation { data, .. } => Some(data.abc_string.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub title: String,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curriculum {
    pub title: String,
    pub parts: Vec<Part>,
}

impl Curriculum {
    /// The book bundled with the reader.
    pub fn builtin() -> Result<Self, CurriculumError> {
        Self::from_yaml(BOOK)
    }

    /// Parse a book and check that chapter ids are unique.
    pub fn from_yaml(source: &str) -> Result<Self, CurriculumError> {
        let curriculum: Curriculum = serde_yaml::from_str(source)?;
        let mut seen = HashSet::new();
        for chapter in curriculum.chapters() {
            if !seen.insert(chapter.id.as_str()) {
                return Err(CurriculumError::DuplicateChapter(chapter.id.clone()));
            }
        }
        Ok(curriculum)
    }

    /// All chapters in reading order.
    pub fn chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.parts.iter().flat_map(|part| part.chapters.iter())
    }

    pub fn chapter(&self, id: &str) -> Option<&Chapter> {
        self.chapters().find(|chapter| chapter.id == id)
    }

    pub fn first_chapter(&self) -> Option<&Chapter> {
        self.chapters().next()
    }

    /// Part that contains the chapter.
    pub fn part_of(&self, id: &str) -> Option<&Part> {
        self.parts
            .iter()
            .find(|part| part.chapters.iter().any(|chapter| chapter.id == id))
    }

    pub fn chapter_count(&self) -> usize {
        self.parts.iter().map(|part| part.chapters.len()).sum()
    }
}
