use std::cell::RefCell;
use std::rc::Rc;

use page_enhancer::{Page, debounce};

#[test]
fn only_the_newest_call_in_a_burst_runs() -> page_enhancer::Result<()> {
    let mut page = Page::from_html("<input name='q'>")?;
    let seen: Rc<RefCell<Vec<(i64, String)>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = seen.clone();
    let debounced = debounce(
        move |page: &mut Page, query: &String| {
            sink.borrow_mut().push((page.now_ms(), query.clone()));
            Ok(())
        },
        100,
    );

    debounced.call(&mut page, "e".to_string())?;
    page.advance_time(30)?;
    debounced.call(&mut page, "ei".to_string())?;
    page.advance_time(30)?;
    debounced.call(&mut page, "eig".to_string())?;

    // Each call supersedes the previous one, so only a single timer is live.
    assert_eq!(page.pending_timers().len(), 1);

    page.advance_time(100)?;
    assert_eq!(*seen.borrow(), [(160, "eig".to_string())]);
    assert_eq!(debounced.pending_timer(), None);

    page.advance_time(500)?;
    assert_eq!(seen.borrow().len(), 1);
    Ok(())
}

#[test]
fn calls_outside_the_wait_window_each_run() -> page_enhancer::Result<()> {
    let mut page = Page::from_html("<p>x</p>")?;
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = seen.clone();
    let debounced = debounce(
        move |_page: &mut Page, query: &String| {
            sink.borrow_mut().push(query.clone());
            Ok(())
        },
        50,
    );

    debounced.call(&mut page, "first".to_string())?;
    page.advance_time(60)?;
    debounced.call(&mut page, "second".to_string())?;
    page.advance_time(60)?;

    assert_eq!(*seen.borrow(), ["first".to_string(), "second".to_string()]);
    Ok(())
}

#[test]
fn clearing_the_pending_timer_cancels_the_trailing_call() -> page_enhancer::Result<()> {
    let mut page = Page::from_html("<p>x</p>")?;
    let count = Rc::new(RefCell::new(0));

    let hits = count.clone();
    let debounced = debounce(
        move |_page: &mut Page, _args: &()| {
            *hits.borrow_mut() += 1;
            Ok(())
        },
        40,
    );

    debounced.call(&mut page, ())?;
    let timer = debounced.pending_timer().expect("a timer should be pending");
    assert!(page.clear_timer(timer));

    page.advance_time(200)?;
    assert_eq!(*count.borrow(), 0);
    Ok(())
}

#[test]
fn debounced_search_submits_once_for_a_typing_burst() -> page_enhancer::Result<()> {
    let mut page = Page::from_html_with_url(
        "https://universalpath.org/",
        r#"<form action="/search"><input name="q"></form>"#,
    )?;

    let debounced = debounce(
        |page: &mut Page, _args: &()| page.submit("form[action=\"/search\"]"),
        100,
    );

    for text in ["e", "ei", "eight"] {
        page.type_text("input[name=\"q\"]", text)?;
        debounced.call(&mut page, ())?;
        page.advance_time(20)?;
    }
    assert!(page.submissions().is_empty());

    page.flush()?;
    assert_eq!(page.submissions().len(), 1);
    assert_eq!(
        page.submissions()[0].fields,
        [("q".to_string(), "eight".to_string())]
    );
    Ok(())
}
