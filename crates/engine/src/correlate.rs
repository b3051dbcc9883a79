//! Maps a fetched URL back to the descriptor that produced it.

use das_types::ServiceDescriptor;
use das_util::strip_query;

use crate::resolve::descriptor_url;

/// Finds the descriptor whose (instance-adjusted) URL produced `url`.
///
/// Matching order: exact URL, then the longest descriptor URL that prefixes
/// it, then equality once both query strings are stripped. Placeholder
/// templates are compared by the part before their first marker. The longest
/// prefix wins so `.../blocks` never claims a `.../blocksummaries` response.
pub fn match_descriptor<'a>(url: &str, descriptors: &'a [ServiceDescriptor], instance: &str) -> Option<&'a ServiceDescriptor> {
    let candidates: Vec<(&ServiceDescriptor, String)> = descriptors
        .iter()
        .filter(|descriptor| !descriptor.is_local())
        .map(|descriptor| (descriptor, descriptor_url(descriptor, instance)))
        .collect();

    if let Some((descriptor, _)) = candidates.iter().find(|(_, template)| template == url) {
        return Some(*descriptor);
    }

    let prefixed = candidates
        .iter()
        .map(|(descriptor, template)| (descriptor, template_base(template)))
        .filter(|(_, base)| !base.is_empty() && url.starts_with(base))
        .max_by_key(|(_, base)| base.len());
    if let Some((descriptor, _)) = prefixed {
        return Some(*descriptor);
    }

    let stripped = strip_query(url);
    candidates
        .iter()
        .find(|(_, template)| strip_query(template) == stripped)
        .map(|(descriptor, _)| *descriptor)
}

/// Template text before the first `{key}` or `%s` marker.
fn template_base(template: &str) -> &str {
    let end = [template.find('{'), template.find("%s")].into_iter().flatten().min();
    match end {
        Some(end) => &template[..end],
        None => template,
    }
}
