use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Structured book content as stored on disk:
/// `{chapters: [{id, title, sections: [{id, title, content}]}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
}

pub fn parse_json_content(raw: &str) -> Result<BookContent, IngestError> {
    Ok(serde_json::from_str(raw)?)
}

/// Parse the two-level Markdown dialect: `##` opens a chapter, `###` opens a
/// section, plain lines accumulate into the current section's body. Lines
/// outside any section are dropped.
pub fn parse_markdown_content(raw: &str, title: &str) -> BookContent {
    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current_chapter: Option<Chapter> = None;
    let mut current_section: Option<Section> = None;
    let mut body: Vec<String> = Vec::new();

    let mut flush_section =
        |chapter: &mut Option<Chapter>, section: &mut Option<Section>, body: &mut Vec<String>| {
            if let (Some(chapter), Some(mut section)) = (chapter.as_mut(), section.take()) {
                section.content = body.join("\n");
                chapter.sections.push(section);
            }
            body.clear();
        };

    for line in raw.lines() {
        let line = line.trim();

        if let Some(heading) = line.strip_prefix("## ") {
            flush_section(&mut current_chapter, &mut current_section, &mut body);
            if let Some(chapter) = current_chapter.take() {
                chapters.push(chapter);
            }
            current_chapter = Some(Chapter {
                id: Some(format!("chapter_{}", chapters.len() + 1)),
                title: Some(heading.trim().to_string()),
                sections: Vec::new(),
            });
        } else if let Some(heading) = line.strip_prefix("### ") {
            flush_section(&mut current_chapter, &mut current_section, &mut body);
            let section_count = current_chapter
                .as_ref()
                .map(|chapter| chapter.sections.len())
                .unwrap_or(0);
            current_section = Some(Section {
                id: Some(format!("section_{}", section_count + 1)),
                title: Some(heading.trim().to_string()),
                content: String::new(),
            });
        } else if !line.is_empty() && current_section.is_some() {
            body.push(line.to_string());
        }
    }

    flush_section(&mut current_chapter, &mut current_section, &mut body);
    if let Some(chapter) = current_chapter.take() {
        chapters.push(chapter);
    }

    BookContent {
        title: Some(title.to_string()),
        chapters,
    }
}
