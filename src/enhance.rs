use std::rc::Rc;

use super::*;

/// Selectors and class sets the enhancement pass works with. The defaults
/// match the production content-site markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceOptions {
    pub menu_button: String,
    pub menu: String,
    pub menu_hidden_class: String,
    pub content: String,
    pub search_form: String,
    pub search_input_name: String,
    pub table_classes: Vec<String>,
    pub header_cell_classes: Vec<String>,
    pub data_cell_classes: Vec<String>,
    pub nav_highlight_class: String,
    pub deferred_attr: String,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            menu_button: ".mobile-menu-button".into(),
            menu: ".mobile-menu".into(),
            menu_hidden_class: "hidden".into(),
            content: ".article-content".into(),
            search_form: "form[action=\"/search\"]".into(),
            search_input_name: "q".into(),
            table_classes: vec![
                "w-full".into(),
                "border-collapse".into(),
                "border".into(),
                "border-gray-300".into(),
                "my-4".into(),
            ],
            header_cell_classes: vec![
                "bg-gray-100".into(),
                "border".into(),
                "border-gray-300".into(),
                "p-2".into(),
                "text-left".into(),
            ],
            data_cell_classes: vec!["border".into(), "border-gray-300".into(), "p-2".into()],
            nav_highlight_class: "text-yellow-300".into(),
            deferred_attr: "data-src".into(),
        }
    }
}

/// Attaches every page enhancement once. Each behavior skips itself when its
/// target markup is absent.
pub fn install(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    install_menu_toggle(page, options)?;
    install_content_links(page, options)?;
    install_anchor_scroll(page)?;
    install_search_guard(page, options)?;
    apply_table_styles(page, options)?;
    highlight_active_nav(page, options)?;
    install_lazy_images(page, options)?;
    Ok(())
}

fn install_menu_toggle(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let Some(button) = page.select_first(&options.menu_button)? else {
        return Ok(());
    };
    let Some(menu) = page.select_first(&options.menu)? else {
        return Ok(());
    };

    let hidden_class = options.menu_hidden_class.clone();
    page.add_listener(
        button,
        "click",
        false,
        Rc::new(move |page, _event| {
            page.dom.toggle_class(menu, &hidden_class)?;
            Ok(())
        }),
    );
    Ok(())
}

fn install_content_links(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let Some(region) = page.select_first(&options.content)? else {
        return Ok(());
    };

    page.add_listener(
        region,
        "click",
        false,
        Rc::new(move |page, event| {
            let target = event.target;
            let is_anchor = page
                .dom
                .tag_name(target)
                .map(|tag| tag.eq_ignore_ascii_case("a"))
                .unwrap_or(false);
            if !is_anchor {
                return Ok(());
            }
            let Some(href) = page.dom.attr(target, "href") else {
                return Ok(());
            };
            if href.starts_with('/') {
                // Site-relative: default navigation proceeds.
                return Ok(());
            }
            event.prevent_default();
            page.open_new_tab(&href);
            Ok(())
        }),
    );
    Ok(())
}

fn install_anchor_scroll(page: &mut Page) -> Result<()> {
    let anchors = page.select_all_ids("a[href^=\"#\"]")?;
    for anchor in anchors {
        page.add_listener(
            anchor,
            "click",
            false,
            Rc::new(move |page, event| {
                event.prevent_default();

                let Some(href) = page.dom.attr(event.current_target, "href") else {
                    return Ok(());
                };
                if href == "#" {
                    return Ok(());
                }

                let target = match page.select_first(&href) {
                    Ok(found) => found,
                    Err(Error::UnsupportedSelector(_)) => None,
                    Err(error) => return Err(error),
                };
                if let Some(target) = target {
                    page.scroll_node_into_view(
                        target,
                        ScrollBehavior::Smooth,
                        ScrollBlock::Start,
                    )?;
                }
                Ok(())
            }),
        );
    }
    Ok(())
}

fn install_search_guard(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let Some(form) = page.select_first(&options.search_form)? else {
        return Ok(());
    };

    let input_selector = format!("input[name=\"{}\"]", options.search_input_name);
    page.add_listener(
        form,
        "submit",
        false,
        Rc::new(move |page, event| {
            let form = event.current_target;
            let input = page
                .select_all_within(form, &input_selector)?
                .into_iter()
                .next();
            match input {
                Some(node) => {
                    if page.dom.value(node)?.trim().is_empty() {
                        event.prevent_default();
                    }
                }
                None => event.prevent_default(),
            }
            Ok(())
        }),
    );
    Ok(())
}

fn apply_table_styles(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let tables = page.select_all_ids(&format!("{} table", options.content))?;
    for table in tables {
        for class_name in &options.table_classes {
            page.dom.add_class(table, class_name)?;
        }
        for header_cell in page.select_all_within(table, "th")? {
            for class_name in &options.header_cell_classes {
                page.dom.add_class(header_cell, class_name)?;
            }
        }
        for data_cell in page.select_all_within(table, "td")? {
            for class_name in &options.data_cell_classes {
                page.dom.add_class(data_cell, class_name)?;
            }
        }
    }
    Ok(())
}

fn highlight_active_nav(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let current_path = page.location.pathname().to_string();
    for link in page.select_all_ids("nav a")? {
        if page.dom.attr_ref(link, "href") == Some(current_path.as_str()) {
            page.dom.add_class(link, &options.nav_highlight_class)?;
        }
    }
    Ok(())
}

fn install_lazy_images(page: &mut Page, options: &EnhanceOptions) -> Result<()> {
    let deferred = page.select_all_ids(&format!("img[{}]", options.deferred_attr))?;

    if !page.intersection_observer_supported() {
        for image in deferred {
            resolve_deferred_image(page, image, &options.deferred_attr)?;
        }
        return Ok(());
    }

    let deferred_attr = options.deferred_attr.clone();
    let observer = page.create_observer(Rc::new(move |page, entries, observer| {
        for entry in entries {
            if !entry.is_intersecting {
                continue;
            }
            resolve_deferred_image(page, entry.target, &deferred_attr)?;
            page.unobserve(observer, entry.target);
        }
        Ok(())
    }));

    for image in deferred {
        page.observe(observer, image);
    }
    Ok(())
}

fn resolve_deferred_image(page: &mut Page, image: NodeId, deferred_attr: &str) -> Result<()> {
    let Some(source) = page.dom.attr(image, deferred_attr) else {
        return Ok(());
    };
    page.dom.set_attr(image, "src", &source)?;
    page.dom.remove_attr(image, deferred_attr)?;
    Ok(())
}
