use crate::page::{ElementId, PageDocument, Rect};

pub const STORY_POINTS_HEADING: &str = "Story Points";
/// How far up from the heading the voting area is searched for avatars.
pub const MAX_ANCESTOR_LEVELS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarElement {
    pub element: ElementId,
    pub picture: String,
    /// `None` when the element is not laid out.
    pub rect: Option<Rect>,
}

fn heading(page: &PageDocument) -> Option<ElementId> {
    let matches = |id: &ElementId| {
        page.element(*id)
            .map(|el| el.own_text().contains(STORY_POINTS_HEADING))
            .unwrap_or(false)
    };
    let candidates: Vec<ElementId> = page.iter().map(|(id, _)| id).filter(matches).collect();
    candidates
        .iter()
        .copied()
        .find(|id| page.element(*id).map(|el| el.is_heading()).unwrap_or(false))
        .or_else(|| candidates.first().copied())
}

fn collect(page: &PageDocument, ids: Vec<ElementId>) -> Vec<AvatarElement> {
    ids.into_iter()
        .filter_map(|id| {
            let element = page.element(id)?;
            Some(AvatarElement {
                element: id,
                picture: element.image_src()?.to_string(),
                rect: element.rect(),
            })
        })
        .collect()
}

/// Avatars belonging to the voting area. Scoped to the region around the
/// "Story Points" heading when one exists, otherwise every image on the page.
pub fn voting_area_avatars(page: &PageDocument) -> Vec<AvatarElement> {
    if let Some(heading) = heading(page) {
        for ancestor in page.ancestors(heading).take(MAX_ANCESTOR_LEVELS) {
            let images = page.images_within(ancestor);
            if !images.is_empty() {
                return collect(page, images);
            }
        }
        if let Some(sibling) = page.next_sibling(heading) {
            let images = page.images_within(sibling);
            if !images.is_empty() {
                return collect(page, images);
            }
        }
    }
    collect(page, page.images())
}
