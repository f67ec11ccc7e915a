/// Installed on every new document before page scripts run. Everything the
/// page reports is queued on `window.__vitalscope.events` until drained.
pub const INSTALL: &str = r#"
(() => {
    if (window.__vitalscope) return;
    const state = { events: [], observers: {}, buffered: {} };
    window.__vitalscope = state;

    const push = (event) => {
        state.events.push(event);
        if (state.events.length > 5000) state.events.shift();
    };
    const describe = (node) => {
        if (!node || !node.tagName) return null;
        let selector = node.tagName.toLowerCase();
        if (node.id) {
            selector += '#' + node.id;
        } else if (typeof node.className === 'string' && node.className.trim()) {
            selector += '.' + node.className.trim().split(/\s+/).slice(0, 2).join('.');
        }
        return selector;
    };
    const rect = (r) => ({ x: r.x, y: r.y, width: r.width, height: r.height });

    for (const name of ['pushState', 'replaceState']) {
        const original = history[name];
        history[name] = function (...args) {
            const result = original.apply(this, args);
            push({ type: 'history', call: name });
            return result;
        };
    }
    addEventListener('popstate', () => push({ type: 'popState' }));
    addEventListener('load', () => push({ type: 'load' }));
    if (window.navigation) {
        navigation.addEventListener('navigate', (e) => {
            push({ type: 'navigate', navigationType: e.navigationType });
        });
    }

    const entryTypes = { layoutShift: 'layout-shift', largestPaint: 'largest-contentful-paint' };
    const toEvent = (kind, epoch, entry) => kind === 'layoutShift'
        ? {
            type: 'layoutShift',
            epoch,
            entry: {
                value: entry.value,
                hadRecentInput: entry.hadRecentInput,
                startTime: entry.startTime,
                sources: (entry.sources || []).map((s) => ({
                    selector: describe(s.node) || 'unknown',
                    previousRect: rect(s.previousRect),
                    currentRect: rect(s.currentRect),
                })),
            },
        }
        : {
            type: 'paintCandidate',
            epoch,
            entry: {
                startTime: entry.startTime,
                size: entry.size,
                element: entry.element
                    ? { tag: entry.element.tagName.toLowerCase(), selector: describe(entry.element) }
                    : null,
                url: entry.url || null,
            },
        };

    state.disconnect = (kind) => {
        const observer = state.observers[kind];
        if (observer) observer.disconnect();
        delete state.observers[kind];
    };
    state.observe = (kind, epoch) => {
        state.disconnect(kind);
        const observer = new PerformanceObserver((list) => {
            try {
                for (const entry of list.getEntries()) push(toEvent(kind, epoch, entry));
            } catch (err) {
                push({ type: 'observerError', kind, epoch, message: String(err) });
            }
        });
        // Only the first subscription replays what happened before it.
        observer.observe({ type: entryTypes[kind], buffered: !state.buffered[kind] });
        state.buffered[kind] = true;
        state.observers[kind] = observer;
        return true;
    };

    const summarize = (record) => {
        if (record.type === 'childList') {
            const added = Array.from(record.addedNodes)
                .filter((n) => n.nodeType === 1)
                .map((n) => {
                    const box = n.getBoundingClientRect();
                    return {
                        tag: n.tagName.toLowerCase(),
                        id: n.id || '',
                        className: typeof n.className === 'string' ? n.className : '',
                        textLength: (n.textContent || '').length,
                        area: box.width * box.height,
                    };
                });
            return { type: 'childList', added };
        }
        if (record.type === 'attributes') return { type: 'attributes', name: record.attributeName };
        return { type: 'characterData' };
    };
    new MutationObserver((records) => {
        push({ type: 'mutations', records: records.map(summarize) });
    }).observe(document, { childList: true, subtree: true, attributes: true, characterData: true });

    const frame = () => {
        const body = document.body;
        push({
            type: 'frame',
            time: performance.now(),
            contentByteLength: body ? body.innerHTML.length : 0,
            elementCount: document.getElementsByTagName('*').length,
            scrollHeight: body ? body.scrollHeight : 0,
            imageCount: document.images.length,
            scriptCount: document.scripts.length,
            timestamp: Date.now(),
        });
        requestAnimationFrame(frame);
    };
    requestAnimationFrame(frame);
})();
"#;

/// Hands over and clears everything queued since the last drain.
pub const DRAIN: &str = r#"
() => {
    const state = window.__vitalscope;
    if (!state) return { installed: false, events: [] };
    const events = state.events;
    state.events = [];
    return { installed: true, events };
}
"#;

pub const OBSERVE: &str = "(kind, epoch) => window.__vitalscope.observe(kind, epoch)";

pub const DISCONNECT: &str = r#"
(kind) => {
    if (window.__vitalscope) window.__vitalscope.disconnect(kind);
    return true;
}
"#;
