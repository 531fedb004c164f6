//! Category rows from breadcrumb trails

use crate::extract::text::slugify;
use crate::storage::Category;

/// Separator between a category slug and its ancestors' slugs
pub const SLUG_SEPARATOR: &str = "]";

/// Builds category rows from an ordered breadcrumb trail
///
/// Breadcrumb trails usually start with a link to the front page and end
/// with the product itself; `keep_first` and `keep_last` decide whether
/// those ends are used.
///
/// Each category's slug is its own slug followed by the slugs of its
/// ancestors, nearest first, joined by `]`. Its parent slug is the ancestor
/// part alone, or empty for a root category.
///
/// # Examples
///
/// ```
/// use pricewatch::extract::categories_from_breadcrumbs;
///
/// let trail = ["Forsíða", "Tölvur", "Fartölvur", "Lenovo X1"];
/// let categories = categories_from_breadcrumbs(&trail, false, false);
///
/// assert_eq!(categories[0].slug, "tolvur");
/// assert_eq!(categories[1].slug, "fartolvur]tolvur");
/// assert_eq!(categories[1].parent, "tolvur");
/// ```
pub fn categories_from_breadcrumbs<S: AsRef<str>>(
    breadcrumbs: &[S],
    keep_first: bool,
    keep_last: bool,
) -> Vec<Category> {
    let last = breadcrumbs.len().saturating_sub(1);

    let kept: Vec<&str> = breadcrumbs
        .iter()
        .enumerate()
        .filter(|(i, _)| (keep_first || *i != 0) && (keep_last || *i != last))
        .map(|(_, text)| text.as_ref().trim())
        .filter(|text| !text.is_empty())
        .collect();

    let mut categories = Vec::with_capacity(kept.len());
    let mut ancestor_slugs: Vec<String> = Vec::new();

    for name in kept {
        let own = slugify(name);
        let parent = ancestor_slugs.join(SLUG_SEPARATOR);
        let slug = if parent.is_empty() {
            own.clone()
        } else {
            format!("{}{}{}", own, SLUG_SEPARATOR, parent)
        };

        categories.push(Category {
            name: name.to_string(),
            slug,
            parent,
        });
        ancestor_slugs.insert(0, own);
    }

    categories
}
