#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use subapp_expr::{Part, Value, Vars, interpolate, stringify};

#[derive(Arbitrary, Debug)]
struct Input {
    template: String,
    bar: i32,
    name: String,
}

fuzz_target!(|input: Input| {
    let template = match interpolate(&input.template) {
        Ok(template) => template,
        Err(err) => {
            assert!(err.offset <= input.template.len());
            return;
        }
    };

    let ctx = Vars::new()
        .with("bar", input.bar)
        .with("name", input.name.as_str());
    if let Ok(rendered) = template.render(&ctx)
        && !template.has_placeholders()
    {
        let literal: String = template
            .parts()
            .iter()
            .map(|part| match part {
                Part::Text(text) => text.as_str(),
                Part::Expr(_) => "",
            })
            .collect();
        assert_eq!(rendered, literal);
    }

    let _ = stringify(&Value::from(input.name));
});
