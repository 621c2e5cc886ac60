use page_enhancer::{
    EnhanceOptions, Navigation, Page, Scroll, ScrollBehavior, ScrollBlock, install,
};

const ARTICLE_URL: &str = "https://universalpath.org/articles/eightfold-path";

const ARTICLE_HTML: &str = r##"
<!DOCTYPE html>
<html>
<head><title>The Eightfold Path</title></head>
<body>
  <nav>
    <a href="/">Home</a>
    <a href="/articles">Articles</a>
    <a href="/articles/eightfold-path">The Eightfold Path</a>
  </nav>
  <button class="mobile-menu-button">Menu</button>
  <div class="mobile-menu hidden">
    <a href="/">Home</a>
    <a href="/articles">Articles</a>
  </div>
  <form action="/search" method="get">
    <input name="q" type="text">
    <button id="search-submit" type="submit">Search</button>
  </form>
  <aside class="toc">
    <a id="toc-link" href="#practice">Practice</a>
    <a id="hash-only" href="#">Top</a>
    <a id="missing-target" href="#nowhere">Nowhere</a>
    <a id="to-hero" href="#hero">Hero image</a>
  </aside>
  <div class="article-content">
    <p>
      Start with <a id="internal-link" href="/articles/meditation">meditation</a>
      or the <a id="external-link" href="https://plato.stanford.edu/entries/buddhism">survey</a>.
    </p>
    <h2 id="practice">Practice</h2>
    <table>
      <tr><th>Step</th><th>Name</th></tr>
      <tr><td>1</td><td>Right View</td></tr>
      <tr><td>2</td><td>Right Intention</td></tr>
    </table>
    <img id="hero" data-src="/img/hero.jpg" alt="">
    <img id="tail" data-src="/img/tail.jpg" alt="">
  </div>
  <table id="outside"><tr><td>raw</td></tr></table>
</body>
</html>
"##;

fn enhanced_article() -> page_enhancer::Result<Page> {
    let mut page = Page::from_html_with_url(ARTICLE_URL, ARTICLE_HTML)?;
    install(&mut page, &EnhanceOptions::default())?;
    Ok(page)
}

#[test]
fn menu_toggle_flips_the_hidden_class_each_click() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    assert!(page.has_class(".mobile-menu", "hidden")?);
    page.click(".mobile-menu-button")?;
    assert!(!page.has_class(".mobile-menu", "hidden")?);
    page.click(".mobile-menu-button")?;
    assert!(page.has_class(".mobile-menu", "hidden")?);
    Ok(())
}

#[test]
fn external_content_link_opens_in_a_new_tab() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#external-link")?;
    assert_eq!(
        page.opened_tabs(),
        ["https://plato.stanford.edu/entries/buddhism"]
    );
    assert_eq!(
        page.navigations(),
        [Navigation {
            url: "https://plato.stanford.edu/entries/buddhism".into(),
            new_tab: true,
        }]
    );
    Ok(())
}

#[test]
fn internal_content_link_navigates_in_place() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#internal-link")?;
    assert_eq!(
        page.navigations(),
        [Navigation {
            url: "/articles/meditation".into(),
            new_tab: false,
        }]
    );
    assert!(page.opened_tabs().is_empty());
    Ok(())
}

#[test]
fn non_anchor_clicks_in_the_content_region_are_ignored() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click(".article-content p")?;
    page.click("#practice")?;
    assert!(page.navigations().is_empty());
    assert!(page.scrolls().is_empty());
    Ok(())
}

#[test]
fn fragment_anchor_scrolls_smoothly_to_its_target() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#toc-link")?;
    assert_eq!(
        page.scrolls(),
        [Scroll {
            target: "h2#practice".into(),
            behavior: ScrollBehavior::Smooth,
            block: ScrollBlock::Start,
        }]
    );
    assert!(page.navigations().is_empty());
    Ok(())
}

#[test]
fn bare_hash_anchor_does_nothing() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#hash-only")?;
    assert!(page.scrolls().is_empty());
    assert!(page.navigations().is_empty());
    Ok(())
}

#[test]
fn missing_fragment_target_degrades_to_a_no_op() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#missing-target")?;
    assert!(page.scrolls().is_empty());
    assert!(page.navigations().is_empty());
    Ok(())
}

#[test]
fn empty_search_submission_is_blocked() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.submit("form[action=\"/search\"]")?;
    assert!(page.submissions().is_empty());

    page.type_text("input[name=\"q\"]", "   \t ")?;
    page.click("#search-submit")?;
    assert!(page.submissions().is_empty());
    Ok(())
}

#[test]
fn non_empty_search_submission_goes_through() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.type_text("input[name=\"q\"]", "eightfold path")?;
    page.submit("form[action=\"/search\"]")?;

    assert_eq!(page.submissions().len(), 1);
    let submission = &page.submissions()[0];
    assert_eq!(submission.action, "/search");
    assert_eq!(submission.method, "get");
    assert!(
        submission
            .fields
            .contains(&("q".into(), "eightfold path".into()))
    );
    Ok(())
}

#[test]
fn search_guard_blocks_forms_without_a_query_input() -> page_enhancer::Result<()> {
    let mut page = Page::from_html_with_url(
        "https://universalpath.org/",
        r#"<form action="/search"><input name="category" value="all"></form>"#,
    )?;
    install(&mut page, &EnhanceOptions::default())?;

    page.submit("form")?;
    assert!(page.submissions().is_empty());
    Ok(())
}

#[test]
fn content_tables_receive_the_full_class_sets() -> page_enhancer::Result<()> {
    let page = enhanced_article()?;

    assert_eq!(
        page.classes_of(".article-content table")?,
        ["w-full", "border-collapse", "border", "border-gray-300", "my-4"]
    );
    assert_eq!(
        page.classes_of(".article-content th")?,
        ["bg-gray-100", "border", "border-gray-300", "p-2", "text-left"]
    );
    assert_eq!(
        page.classes_of(".article-content td")?,
        ["border", "border-gray-300", "p-2"]
    );
    // Tables outside the content region keep their markup untouched.
    assert_eq!(page.classes_of("#outside")?.len(), 0);
    Ok(())
}

#[test]
fn nav_link_matching_the_current_path_is_highlighted() -> page_enhancer::Result<()> {
    let page = enhanced_article()?;

    assert!(page.has_class("nav a[href=\"/articles/eightfold-path\"]", "text-yellow-300")?);
    assert!(!page.has_class("nav a[href=\"/articles\"]", "text-yellow-300")?);
    assert!(!page.has_class("nav a[href=\"/\"]", "text-yellow-300")?);
    // The same href outside <nav> is not considered.
    assert!(!page.has_class(".mobile-menu a[href=\"/articles\"]", "text-yellow-300")?);
    Ok(())
}

#[test]
fn deferred_images_resolve_when_revealed() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    assert_eq!(page.observer_count(), 1);
    assert_eq!(page.observed_count(), 2);
    assert_eq!(page.attr("#hero", "src")?, None);

    page.reveal("#hero")?;
    assert_eq!(page.attr("#hero", "src")?, Some("/img/hero.jpg".into()));
    assert_eq!(page.attr("#hero", "data-src")?, None);
    assert_eq!(page.observed_count(), 1);

    // Still deferred until it scrolls in.
    assert_eq!(page.attr("#tail", "src")?, None);

    page.reveal("#tail")?;
    assert_eq!(page.attr("#tail", "src")?, Some("/img/tail.jpg".into()));
    assert_eq!(page.observed_count(), 0);
    Ok(())
}

#[test]
fn revealing_an_image_twice_loads_it_once() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.reveal("#hero")?;
    page.reveal("#hero")?;
    assert_eq!(page.attr("#hero", "src")?, Some("/img/hero.jpg".into()));
    assert_eq!(page.observed_count(), 1);
    Ok(())
}

#[test]
fn scrolling_to_a_deferred_image_resolves_it() -> page_enhancer::Result<()> {
    let mut page = enhanced_article()?;

    page.click("#to-hero")?;
    assert_eq!(page.scrolls().len(), 1);
    assert_eq!(page.scrolls()[0].target, "img#hero");
    assert_eq!(page.attr("#hero", "src")?, Some("/img/hero.jpg".into()));
    Ok(())
}

#[test]
fn without_observer_support_deferred_images_load_eagerly() -> page_enhancer::Result<()> {
    let mut page = Page::from_html_with_url(ARTICLE_URL, ARTICLE_HTML)?;
    page.set_intersection_observer_supported(false);
    install(&mut page, &EnhanceOptions::default())?;

    assert_eq!(page.observer_count(), 0);
    assert_eq!(page.attr("#hero", "src")?, Some("/img/hero.jpg".into()));
    assert_eq!(page.attr("#tail", "src")?, Some("/img/tail.jpg".into()));
    assert_eq!(page.attr("#hero", "data-src")?, None);
    Ok(())
}

#[test]
fn fragment_link_inside_the_content_region_also_opens_a_tab() -> page_enhancer::Result<()> {
    // A fragment anchor that sits inside the content region hits both the
    // smooth-scroll listener and the delegated link handler, which treats any
    // non-root-relative href as external.
    let mut page = Page::from_html_with_url(
        ARTICLE_URL,
        r##"
        <div class="article-content">
          <a id="inner-toc" href="#notes">Notes</a>
          <h2 id="notes">Notes</h2>
        </div>
        "##,
    )?;
    install(&mut page, &EnhanceOptions::default())?;

    page.click("#inner-toc")?;
    assert_eq!(page.scrolls().len(), 1);
    assert_eq!(page.scrolls()[0].target, "h2#notes");
    assert_eq!(page.opened_tabs(), ["#notes"]);
    Ok(())
}

#[test]
fn install_tolerates_pages_missing_all_enhancement_targets() -> page_enhancer::Result<()> {
    let mut page = Page::from_html("<main><p>Nothing to enhance.</p></main>")?;
    install(&mut page, &EnhanceOptions::default())?;

    page.click("main p")?;
    assert!(page.navigations().is_empty());
    assert!(page.submissions().is_empty());
    assert!(page.scrolls().is_empty());
    assert_eq!(page.observer_count(), 1);
    assert_eq!(page.observed_count(), 0);
    Ok(())
}

#[test]
fn custom_options_redirect_the_selectors() -> page_enhancer::Result<()> {
    let mut page = Page::from_html_with_url(
        "https://universalpath.org/",
        r#"
        <button class="nav-toggle">=</button>
        <div class="site-drawer closed"><a href="/">Home</a></div>
        "#,
    )?;
    let options = EnhanceOptions {
        menu_button: ".nav-toggle".into(),
        menu: ".site-drawer".into(),
        menu_hidden_class: "closed".into(),
        ..EnhanceOptions::default()
    };
    install(&mut page, &options)?;

    page.click(".nav-toggle")?;
    assert!(!page.has_class(".site-drawer", "closed")?);
    Ok(())
}
