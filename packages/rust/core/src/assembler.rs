//! Flattening of a message and its fragments into indexable documents.

use threadcrawl_shared::{EnrichedFragment, IndexableDocument, ParsedMessage};

/// One document per (fragment × attachment), base message first.
///
/// The base fragment carries the message text under each of its own
/// attachments; a message without attachments contributes nothing itself.
pub fn assemble_documents(
    base: ParsedMessage,
    fragments: Vec<EnrichedFragment>,
) -> Vec<IndexableDocument> {
    std::iter::once(EnrichedFragment::from(base))
        .chain(fragments)
        .flat_map(|fragment| {
            let EnrichedFragment {
                text, attachments, ..
            } = fragment;
            attachments
                .into_iter()
                .map(move |a| IndexableDocument {
                    url: a.url,
                    name: a.title,
                    text: text.clone(),
                })
        })
        .collect()
}
