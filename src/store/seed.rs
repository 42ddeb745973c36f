use crate::models::{CodeTemplate, Example, Problem, TestCase};

/// Problems available when no problem file is configured.
pub fn seed_problems() -> Vec<Problem> {
    vec![
        Problem {
            id: 1,
            title: "Two Sum".to_string(),
            description: "Given an array of integers nums and an integer target, return indices \
                          of the two numbers such that they add up to target."
                .to_string(),
            difficulty: "easy".to_string(),
            examples: vec![
                example("nums = [2,7,11,15], target = 9", "[0,1]"),
                example("nums = [3,2,4], target = 6", "[1,2]"),
            ],
            test_cases: vec![
                case("4\n2 7 11 15\n9", "0 1"),
                case("3\n3 2 4\n6", "1 2"),
                case("2\n3 3\n6", "0 1"),
            ],
            template: CodeTemplate {
                header: "#include <bits/stdc++.h>\nusing namespace std;".to_string(),
                user_stub: "vector<int> twoSum(vector<int>& nums, int target) {\n    // Your code here\n}"
                    .to_string(),
                driver: r#"int main() {
    int n, target;
    cin >> n;
    vector<int> nums(n);
    for (int i = 0; i < n; i++) {
        cin >> nums[i];
    }
    cin >> target;

    vector<int> result = twoSum(nums, target);
    cout << result[0] << " " << result[1] << endl;

    return 0;
}"#
                .to_string(),
            },
        },
        Problem {
            id: 2,
            title: "Reverse Integer".to_string(),
            description: "Given a signed 32-bit integer x, return x with its digits reversed. If \
                          reversing x causes the value to go outside the signed 32-bit integer \
                          range, then return 0."
                .to_string(),
            difficulty: "medium".to_string(),
            examples: vec![example("x = 123", "321"), example("x = -123", "-321")],
            test_cases: vec![
                case("123", "321"),
                case("-123", "-321"),
                case("120", "21"),
                case("0", "0"),
            ],
            template: CodeTemplate {
                header: "#include <bits/stdc++.h>\nusing namespace std;".to_string(),
                user_stub: "int reverse(int x) {\n    // Your code here\n}".to_string(),
                driver: r#"int main() {
    int x;
    cin >> x;

    int result = reverse(x);
    cout << result << endl;

    return 0;
}"#
                .to_string(),
            },
        },
    ]
}

fn example(input: &str, expected_output: &str) -> Example {
    Example {
        input: input.to_string(),
        expected_output: expected_output.to_string(),
    }
}

fn case(input: &str, expected_output: &str) -> TestCase {
    TestCase {
        input: input.to_string(),
        expected_output: expected_output.to_string(),
    }
}
