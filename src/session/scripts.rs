//! Page scripts evaluated by the CDP session
//!
//! Each query script returns a JSON array whose entries match the shapes in
//! [`schema`](super::schema). Affordance handles are CSS selectors the session clicks.

/// `"document"`, `"collection"` or `"unknown"`
pub(super) const PAGE_KIND: &str = r#"(() => {
    if (document.querySelector('.toolbar-page-indicator, .presentation-toolbar, #toolbar')) {
        return 'document';
    }
    if (document.querySelector('[class*="index-module__card"]')) {
        return 'collection';
    }
    return 'unknown';
})()"#;

/// Whether a login, email or passcode form covers the content
pub(super) const GATED: &str = r#"(() => {
    const form = document.querySelector(
        'form[action*="auth"], input[type="email"], input[type="password"], input[name*="passcode"]'
    );
    if (!form) return false;
    const style = getComputedStyle(form);
    return style.display !== 'none' && style.visibility !== 'hidden';
})()"#;

/// The folder listing has rendered
pub(super) const COLLECTION_READY: &str = r#"(() => {
    return document.readyState !== 'loading'
        && document.querySelector('[class*="index-module__card"]') !== null;
})()"#;

/// The viewer has rendered its page indicator
pub(super) const VIEWER_READY: &str = r#"(() => {
    const ind = document.querySelector('.toolbar-page-indicator');
    return ind !== null && ind.innerText.includes('/');
})()"#;

/// Direct children of the displayed folder, read from the card components' props
pub(super) const FOLDER_CHILDREN: &str = r#"(() => {
    const cards = document.querySelectorAll('[class*="index-module__card"]');
    for (const card of cards) {
        const key = Object.keys(card).find(
            k => k.startsWith('__reactFiber$') || k.startsWith('__reactInternalInstance$')
        );
        if (!key) continue;
        let fiber = card[key];
        for (let i = 0; i < 30 && fiber; i++) {
            const folder = fiber.memoizedProps && fiber.memoizedProps.folder;
            if (folder && folder.__typename === 'SpaceFolder' && folder.contents) {
                const out = [];
                for (const node of folder.contents.nodes || []) {
                    if (!node || !node.name) continue;
                    const isFolder = node.__typename === 'SpaceFolder';
                    if (!isFolder && node.__typename !== 'SpaceDocument') continue;
                    out.push({
                        kind: isFolder ? 'folder' : 'document',
                        id: String(node.databaseId || node.id || node.href),
                        name: node.name,
                        url: node.href ? new URL(node.href, location.href).href : null,
                    });
                }
                return out;
            }
            fiber = fiber.return;
        }
    }
    return [];
})()"#;

/// Signed page images of the displayed document, via the viewer's page data endpoint
pub(super) const PAGE_IMAGES: &str = r#"(async () => {
    const ind = document.querySelector('.toolbar-page-indicator');
    if (!ind) return [];
    const parts = ind.innerText.split('/');
    const total = parts.length > 1 ? parseInt(parts[1].trim()) : 0;
    if (!total) return [];
    const base = location.href.split('?')[0].replace(/\/$/, '') + '/page_data/';
    const out = [];
    await Promise.all(Array.from({length: total}, (_, i) =>
        fetch(base + (i + 1), {credentials: 'same-origin'})
            .then(r => r.ok ? r.json() : null)
            .catch(() => null)
            .then(d => out.push({page: i + 1, url: d && d.imageUrl ? d.imageUrl : null}))
    ));
    return out;
})()"#;

/// The document's own download control
pub(super) const DOWNLOAD_AFFORDANCE: &str = r#"(() => {
    const toolbar = document.getElementById('toolbar')
        || document.querySelector('.presentation-toolbar');
    if (!toolbar) return [];
    const selectors = ['[aria-label*="ownload"]', 'a[href*="download"]', '[data-testid*="download"]'];
    for (const sel of selectors) {
        if (toolbar.querySelector(sel)) {
            const prefix = toolbar.id ? '#' + toolbar.id : '.presentation-toolbar';
            return [{handle: prefix + ' ' + sel}];
        }
    }
    return [];
})()"#;

/// A visible download control on the collection landing page
pub(super) const BULK_AFFORDANCE: &str = r#"(() => {
    const selectors = [
        'a[href*="download"]',
        'button[aria-label*="ownload"]',
        '[data-testid*="download"]',
        '[class*="download"]',
    ];
    for (const sel of selectors) {
        const el = document.querySelector(sel);
        if (!el) continue;
        const style = getComputedStyle(el);
        if (style.display !== 'none' && style.visibility !== 'hidden') {
            return [{handle: sel}];
        }
    }
    return [];
})()"#;

/// Click the element matching a handle; evaluates to whether it was found
pub(super) fn click(handle: &str) -> String {
    let selector = serde_json::Value::String(handle.to_string());
    format!(
        "(() => {{ const el = document.querySelector({selector}); if (!el) return false; el.click(); return true; }})()"
    )
}
