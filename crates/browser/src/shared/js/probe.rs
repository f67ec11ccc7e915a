/// Everything the engine may ask synchronously, read in one round trip.
pub const PROBE: &str = r#"
() => {
    const supported = (window.PerformanceObserver && PerformanceObserver.supportedEntryTypes) || [];
    const nav = performance.getEntriesByType('navigation')[0];
    const fcp = performance.getEntriesByName('first-contentful-paint')[0];
    const viewportHeight = window.innerHeight;

    const candidates = [];
    const consider = (el, elementType) => {
        const box = el.getBoundingClientRect();
        const size = box.width * box.height;
        if (size <= 0) return;
        let selector = el.tagName.toLowerCase();
        if (el.id) selector += '#' + el.id;
        candidates.push({ elementType, selector, size, aboveFold: box.top < viewportHeight });
    };
    document.querySelectorAll('img').forEach((el) => consider(el, 'image'));
    document.querySelectorAll('video').forEach((el) => consider(el, 'video'));
    document.querySelectorAll('h1, h2, h3, p').forEach((el) => {
        if ((el.textContent || '').trim().length > 20) consider(el, 'text-block');
    });
    document.querySelectorAll('[style*="background-image"]').forEach((el) => consider(el, 'background-image'));
    candidates.sort((a, b) => b.size - a.size);

    return {
        now: performance.now(),
        timeOrigin: performance.timeOrigin,
        wallClock: Date.now(),
        url: location.href,
        readyState: document.readyState,
        capabilities: {
            layoutShift: supported.includes('layout-shift'),
            largestPaint: supported.includes('largest-contentful-paint'),
            paint: supported.includes('paint'),
            navigationTiming: supported.includes('navigation'),
            navigationApi: 'navigation' in window,
        },
        timing: nav ? {
            activationStart: nav.activationStart || 0,
            fetchStart: nav.fetchStart,
            requestStart: nav.requestStart,
            responseStart: nav.responseStart,
            domContentLoadedEventEnd: nav.domContentLoadedEventEnd,
            loadEventEnd: nav.loadEventEnd,
            duration: nav.duration,
        } : null,
        fcp: fcp ? fcp.startTime : null,
        elementCount: document.getElementsByTagName('*').length,
        candidates: candidates.slice(0, 50),
    };
}
"#;
