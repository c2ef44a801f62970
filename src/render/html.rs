//! HTML body to flat text.

use html2text::{Element, Handle};

/// Lines are never wrapped in practice; the body pane does its own wrapping.
const RENDER_WIDTH: usize = 10_000;

fn is_style_element(node: &Handle) -> bool {
    matches!(&node.data, Element { name, .. } if &*name.local == "style")
}

/// Removes `<style>` elements and every `style` attribute from a parsed
/// document. Element and attribute names are already lowercase after
/// parsing.
fn strip_styles(document: &Handle) {
    let mut pending = vec![document.clone()];
    while let Some(node) = pending.pop() {
        if let Element { attrs, .. } = &node.data {
            attrs.borrow_mut().retain(|attr| &*attr.name.local != "style");
        }
        let mut children = node.children.borrow_mut();
        children.retain(|child| !is_style_element(child));
        pending.extend(children.iter().cloned());
    }
}

/// Extracts the visible text of an HTML body.
///
/// Never fails: malformed markup yields whatever text could be
/// recovered, an empty string in the worst case.
pub fn extract_text(html: &str) -> String {
    let config = html2text::config::plain_no_decorate();
    let text = config.parse_html(html.as_bytes()).and_then(|dom| {
        strip_styles(&dom.document);
        let tree = config.dom_to_render_tree(&dom)?;
        config.render_to_string(tree, RENDER_WIDTH)
    });

    match text {
        Ok(text) => text,
        Err(e) => {
            log::debug!("html to text conversion failed, rendering empty body: {e}");
            String::new()
        }
    }
}
