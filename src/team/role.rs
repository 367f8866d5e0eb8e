//! 角色与角色转移表
//!
//! 每个角色回合结束后给出 next_action，由固定的转移表映射到下一个角色（含回退重做）；
//! 未知动作一律按 `continue` 处理。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 团队角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Boss,
    ProductManager,
    Architect,
    ProjectManager,
    Engineer,
    Qa,
}

/// 转移目标：下一个角色或结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Role(Role),
    End,
}

/// 工作流阶段（写入状态更新的 current_stage）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requirement,
    Design,
    Development,
    Testing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Requirement => "requirement",
            Stage::Design => "design",
            Stage::Development => "development",
            Stage::Testing => "testing",
        }
    }
}

impl Role {
    /// 分类器解析回复时的匹配顺序
    pub const ALL: [Role; 6] = [
        Role::Boss,
        Role::ProductManager,
        Role::Architect,
        Role::ProjectManager,
        Role::Engineer,
        Role::Qa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Boss => "boss",
            Role::ProductManager => "product_manager",
            Role::Architect => "architect",
            Role::ProjectManager => "project_manager",
            Role::Engineer => "engineer",
            Role::Qa => "qa",
        }
    }

    /// 历史摘要消息的前缀标签
    pub fn label(&self) -> &'static str {
        match self {
            Role::Boss => "Boss",
            Role::ProductManager => "PM",
            Role::Architect => "Architect",
            Role::ProjectManager => "PJM",
            Role::Engineer => "Engineer",
            Role::Qa => "QA",
        }
    }

    /// 角色回合结束后进入的阶段；architect / project_manager 不改变阶段
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Role::Boss => Some(Stage::Requirement),
            Role::ProductManager => Some(Stage::Design),
            Role::Engineer => Some(Stage::Development),
            Role::Qa => Some(Stage::Testing),
            Role::Architect | Role::ProjectManager => None,
        }
    }

    /// 首次进入（或上一角色未给出指令）时使用的默认指令
    pub fn default_instruction(&self, framework: &str) -> String {
        match self {
            Role::Boss => format!("请分析用户需求并创建 requirements.md 文档。目标框架：{}", framework),
            Role::ProductManager => "请阅读 requirements.md 并编写详细的 PRD 文档（prd.md）".to_string(),
            Role::Architect => format!("请阅读 prd.md 并设计技术架构，生成 design.md。目标框架：{}", framework),
            Role::ProjectManager => {
                "请阅读 prd.md 和 design.md，将需求拆解为具体的开发任务，生成 tasks.md".to_string()
            }
            Role::Engineer => format!(
                "请根据 design.md 和 tasks.md 实现代码。目标框架：{}。一次完成一个任务，测试后再继续。",
                framework
            ),
            Role::Qa => "请编写测试用例并执行测试，生成测试报告 test_report.md".to_string(),
        }
    }

    /// 该角色允许的 (动作, 目标) 映射；第一项总是 `continue`
    pub fn transitions(&self) -> &'static [(&'static str, Next)] {
        use Next::End;
        match self {
            Role::Boss => &[("continue", Next::Role(Role::ProductManager)), ("end", End)],
            Role::ProductManager => &[
                ("continue", Next::Role(Role::Architect)),
                ("back_to_boss", Next::Role(Role::Boss)),
                ("end", End),
            ],
            Role::Architect => &[
                ("continue", Next::Role(Role::ProjectManager)),
                ("back_to_pm", Next::Role(Role::ProductManager)),
                ("end", End),
            ],
            Role::ProjectManager => &[
                ("continue", Next::Role(Role::Engineer)),
                ("back_to_architect", Next::Role(Role::Architect)),
                ("back_to_pm", Next::Role(Role::ProductManager)),
                ("end", End),
            ],
            Role::Engineer => &[
                ("continue", Next::Role(Role::Qa)),
                ("continue_development", Next::Role(Role::Engineer)),
                ("back_to_architect", Next::Role(Role::Architect)),
                ("end", End),
            ],
            Role::Qa => &[
                ("continue", End),
                ("back_to_engineer", Next::Role(Role::Engineer)),
                ("end", End),
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

impl Next {
    pub fn as_str(&self) -> &'static str {
        match self {
            Next::Role(r) => r.as_str(),
            Next::End => "end",
        }
    }
}

/// 查转移表；未映射的动作回落到 `continue` 的目标
pub fn resolve_next_role(role: Role, action: &str) -> Next {
    let table = role.transitions();
    table
        .iter()
        .find(|(a, _)| *a == action)
        .or_else(|| table.first())
        .map(|(_, next)| *next)
        .unwrap_or(Next::End)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continue_chain_reaches_end() {
        let mut role = Role::Boss;
        let mut visited = vec![role];
        while let Next::Role(next) = resolve_next_role(role, "continue") {
            visited.push(next);
            role = next;
        }
        assert_eq!(
            visited,
            vec![
                Role::Boss,
                Role::ProductManager,
                Role::Architect,
                Role::ProjectManager,
                Role::Engineer,
                Role::Qa
            ]
        );
    }

    #[test]
    fn test_backward_loops() {
        assert_eq!(resolve_next_role(Role::ProductManager, "back_to_boss"), Next::Role(Role::Boss));
        assert_eq!(resolve_next_role(Role::Architect, "back_to_pm"), Next::Role(Role::ProductManager));
        assert_eq!(
            resolve_next_role(Role::ProjectManager, "back_to_architect"),
            Next::Role(Role::Architect)
        );
        assert_eq!(
            resolve_next_role(Role::ProjectManager, "back_to_pm"),
            Next::Role(Role::ProductManager)
        );
        assert_eq!(
            resolve_next_role(Role::Engineer, "continue_development"),
            Next::Role(Role::Engineer)
        );
        assert_eq!(resolve_next_role(Role::Engineer, "back_to_architect"), Next::Role(Role::Architect));
        assert_eq!(resolve_next_role(Role::Qa, "back_to_engineer"), Next::Role(Role::Engineer));
        for role in Role::ALL {
            assert_eq!(resolve_next_role(role, "end"), Next::End);
        }
    }

    #[test]
    fn test_unmapped_action_falls_back_to_continue() {
        for role in Role::ALL {
            assert_eq!(
                resolve_next_role(role, "fly_to_the_moon"),
                resolve_next_role(role, "continue"),
                "{}",
                role
            );
        }
        // boss 没有 back_to_boss，按 continue 处理
        assert_eq!(resolve_next_role(Role::Boss, "back_to_boss"), Next::Role(Role::ProductManager));
    }

    #[test]
    fn test_default_instruction_uses_framework() {
        assert!(Role::Boss.default_instruction("vue").contains("vue"));
        assert!(Role::Engineer.default_instruction("react").contains("react"));
        assert!(Role::Qa.default_instruction("react").contains("test_report.md"));
    }

    #[test]
    fn test_role_names_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(Role::Boss.stage(), Some(Stage::Requirement));
        assert_eq!(Role::Architect.stage(), None);
    }
}
