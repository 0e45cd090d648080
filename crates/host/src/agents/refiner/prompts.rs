// crates/host/src/agents/refiner/prompts.rs

//! System prompt for correcting a candidate from a failed run.

pub fn fix_prompt() -> String {
    r#"You are an expert at debugging and improving functions.

An agent solved a task with a set of tools. A new function was then added to
that set and the agent solved the task again, but the new function did not
help because it is not defined properly. Most such failures come from argument
parsing: the input was expected in one format and arrived in another.

## YOUR TASK
Read the new trajectory and fix the newly added function, for example by
converting its arguments into the required type before using them.

## RULES
1. Change ONLY what caused the observed mistake. Do not anticipate new ones.
2. Keep the function name and its JSON docstring format.

## OUTPUT
Reply with a JSON object only:
{
    "explanation": <what caused the failure and what you changed>,
    "new_function": <the corrected function source>
}"#
    .to_string()
}

pub fn fix_request(library: &str, function: &str, trajectory: &str) -> String {
    format!(
        "Old Library: {}\nNew Function: {}\n\nNew Trajectory: {}",
        library, function, trajectory
    )
}
