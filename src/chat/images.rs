//! Resolves markdown image placeholders in a finished answer against the
//! images stored on a document's pages.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::llm::ResolvedImage;
use crate::store::Page;

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Image payloads referenced by `answer`, in order of first appearance.
///
/// Lookups accept the reference with or without its file extension.
/// References with no stored image are logged and skipped.
pub fn resolve_images(answer: &str, pages: &[Page]) -> Vec<ResolvedImage> {
    let mut by_key: HashMap<&str, (&str, &str)> = HashMap::new();
    for image in pages.iter().flat_map(|p| p.images.iter()) {
        let entry = (image.id.as_str(), image.image_base64.as_str());
        by_key.entry(image.id.as_str()).or_insert(entry);
        by_key.entry(strip_extension(&image.id)).or_insert(entry);
    }

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for capture in IMAGE_REF.captures_iter(answer) {
        let reference = capture[1].trim();
        let found = by_key
            .get(reference)
            .or_else(|| by_key.get(strip_extension(reference)));
        match found {
            Some(&(id, payload)) => {
                if seen.insert(id) {
                    resolved.push(ResolvedImage {
                        id: strip_extension(id).to_string(),
                        image_base64: payload.to_string(),
                    });
                }
            }
            None => tracing::warn!("Image {} referenced in answer was not found", reference),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PageImage;

    fn page(number: u32, images: &[(&str, &str)]) -> Page {
        Page::from_ocr_index(
            "doc",
            number - 1,
            String::new(),
            images
                .iter()
                .map(|(id, data)| PageImage {
                    id: id.to_string(),
                    image_base64: data.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn resolves_reference_with_extension_against_bare_id() {
        let pages = vec![page(1, &[("img-2", "QUJD")])];
        let images = resolve_images("Press power. ![img-2.jpeg](img-2.jpeg)", &pages);
        assert_eq!(
            images,
            vec![ResolvedImage {
                id: "img-2".to_string(),
                image_base64: "QUJD".to_string()
            }]
        );
    }

    #[test]
    fn resolves_bare_reference_against_id_with_extension() {
        let pages = vec![page(3, &[("img-7.jpeg", "WFla")])];
        let images = resolve_images("See ![img-7](img-7)", &pages);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].image_base64, "WFla");
    }

    #[test]
    fn keeps_first_appearance_order_and_dedupes() {
        let pages = vec![
            page(1, &[("img-0.jpeg", "a")]),
            page(2, &[("img-1.jpeg", "b")]),
        ];
        let answer = "![x](img-1.jpeg) then ![y](img-0.jpeg) and again ![z](img-1.jpeg)";
        let ids: Vec<String> = resolve_images(answer, &pages).into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["img-1", "img-0"]);
    }

    #[test]
    fn unknown_references_are_skipped() {
        let pages = vec![page(1, &[("img-0.jpeg", "a")])];
        let images = resolve_images("![a](img-9.jpeg) ![b](img-0.jpeg)", &pages);
        assert_eq!(images.len(), 1);
        assert!(resolve_images("no images here", &pages).is_empty());
    }
}
